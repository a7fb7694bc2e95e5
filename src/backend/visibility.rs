//! Visibility of refs, including server-managed ones
//!
//! Ordinary branches are visible with READ. Refs holding server metadata
//! follow the visibility of what they describe: change refs that of their
//! change, edit refs and account refs only their account.

use crate::access_control::patterns::ALL_REFS;
use crate::backend::control::{ProjectControl, UserContext};
use crate::change::{Change, ChangeId, ChangeLoadError};
use crate::error::{BackendResult, PermissionBackendError};
use crate::identity::{AccountId, Identity};
use crate::permissions::{GlobalPermission, ProjectPermission};
use crate::util::refs;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Options for bulk ref filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefFilterOptions {
    /// Drop change and edit refs entirely
    pub filter_meta: bool,
}

impl RefFilterOptions {
    pub fn filter_meta(mut self, filter_meta: bool) -> Self {
        self.filter_meta = filter_meta;
        self
    }
}

/// Ref visibility for one user on one project
pub struct RefVisibilityControl {
    control: Arc<ProjectControl>,
}

impl RefVisibilityControl {
    pub(crate) fn new(control: Arc<ProjectControl>) -> Self {
        Self { control }
    }

    fn user(&self) -> &UserContext {
        self.control.user()
    }

    fn identity(&self) -> &Identity {
        self.control.identity()
    }

    fn is_own_account(&self, account: u32) -> bool {
        self.identity().account_id() == Some(AccountId(account))
    }

    fn can_read_ref(&self, ref_name: &str) -> BackendResult<bool> {
        Ok(self.control.state_permits(false)? && self.control.control_for_ref(ref_name).is_visible())
    }

    /// Holders of accessDatabase see all server metadata
    fn can_view_metadata(&self) -> BackendResult<bool> {
        self.user().can(GlobalPermission::AccessDatabase)
    }

    fn load_change(&self, id: ChangeId) -> Result<Arc<Change>, ChangeLoadError> {
        self.user()
            .backend
            .changes
            .load_change(self.control.name(), id)
    }

    fn is_change_visible(&self, change: Arc<Change>) -> BackendResult<bool> {
        let dest = change.dest().to_string();
        let control = self.control.control_for_ref(&dest).change_control(change);
        Ok(self.control.state_permits(false)? && control.is_visible())
    }

    /// Whether a single ref is visible.
    ///
    /// Tags cannot be checked one at a time; use [`RefVisibilityControl::filter`].
    pub fn is_visible(&self, ref_name: &str) -> BackendResult<bool> {
        if refs::is_tag(ref_name) {
            return Err(PermissionBackendError::TagRefNotSupported(
                ref_name.to_string(),
            ));
        }
        let visible = self.evaluate(ref_name)?;
        trace!(
            user = %self.identity(),
            project = self.control.name(),
            ref_name,
            visible,
            "Evaluated ref visibility"
        );
        Ok(visible)
    }

    fn evaluate(&self, ref_name: &str) -> BackendResult<bool> {
        if !refs::is_server_managed(ref_name) {
            return self.can_read_ref(ref_name);
        }
        if ref_name.starts_with(refs::REFS_CACHE_AUTOMERGE) {
            return Ok(false);
        }
        if self.can_view_metadata()? {
            return Ok(true);
        }

        if let Some(id) = ChangeId::from_ref(ref_name) {
            return match self.load_change(id) {
                Ok(change) => self.is_change_visible(change),
                // Deleted changes stay visible to those who can read the
                // whole project, so deletion events can be delivered
                Err(e) if e.is_not_found() => {
                    debug!(change = %id, "Change not found, falling back to project read");
                    Ok(self.control.state_permits(false)? && self.control.can(ProjectPermission::Read)?)
                }
                Err(e) => Err(change_unavailable(id, e)),
            };
        }

        if let Some((account, change)) = refs::parse_edit_ref(ref_name) {
            if !self.is_own_account(account) {
                return Ok(false);
            }
            return match self.load_change(ChangeId(change)) {
                Ok(change) => self.is_change_visible(change),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(change_unavailable(ChangeId(change), e)),
            };
        }

        if let Some(account) = refs::parse_account_ref(ref_name) {
            return Ok(self.is_own_account(account) && self.can_read_ref(ref_name)?);
        }

        Ok(false)
    }

    /// The refs among `ref_names` the user may see, in input order.
    ///
    /// Unlike [`RefVisibilityControl::is_visible`] this also handles tags,
    /// which are visible with READ on the tag.
    pub fn filter<I>(&self, ref_names: I, options: &RefFilterOptions) -> BackendResult<Vec<String>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let ref_names: Vec<String> = ref_names.into_iter().map(Into::into).collect();
        let settings = &self.user().backend.settings;
        let all_users = self.control.name() == settings.all_users;

        if settings.skip_full_ref_evaluation && !all_users && self.control.state().permits_read() {
            if self.control.all_refs_are_visible(&[]) {
                debug!(
                    user = %self.identity(),
                    project = self.control.name(),
                    refs = ref_names.len(),
                    "All refs visible, skipping per-ref evaluation"
                );
                return Ok(ref_names);
            }
            if self.control.all_refs_are_visible(&[refs::REFS_CONFIG]) {
                let hide_config = !self.can_read_ref(refs::REFS_CONFIG)?;
                return Ok(ref_names
                    .into_iter()
                    .filter(|r| !(hide_config && refs::is_config(r)))
                    .collect());
            }
        }

        let view_metadata = self.can_view_metadata()?;
        let read_on_all_refs = self.has_read_on_all_refs();
        let total = ref_names.len();
        let mut visible = Vec::new();

        for ref_name in ref_names {
            if ref_name.starts_with(refs::REFS_CACHE_AUTOMERGE) {
                continue;
            }
            let is_meta =
                ChangeId::from_ref(&ref_name).is_some() || refs::parse_edit_ref(&ref_name).is_some();
            if options.filter_meta && is_meta {
                continue;
            }

            let keep = if refs::is_tag(&ref_name) {
                read_on_all_refs || self.can_read_ref(&ref_name)?
            } else if ref_name.starts_with(refs::REFS_SEQUENCES)
                || (all_users && ref_name == refs::REFS_EXTERNAL_IDS)
            {
                view_metadata
            } else {
                match self.evaluate(&ref_name) {
                    Ok(keep) => keep,
                    Err(e) => {
                        warn!(ref_name = %ref_name, error = %e, "Cannot evaluate ref visibility, hiding it");
                        false
                    }
                }
            };

            if keep {
                visible.push(ref_name);
            }
        }

        debug!(
            user = %self.identity(),
            project = self.control.name(),
            total,
            visible = visible.len(),
            "Filtered refs"
        );
        Ok(visible)
    }

    fn has_read_on_all_refs(&self) -> bool {
        self.control.control_for_ref(ALL_REFS).is_visible()
    }
}

fn change_unavailable(id: ChangeId, e: ChangeLoadError) -> PermissionBackendError {
    PermissionBackendError::unavailable_with_cause(
        format!("cannot load change {}", id),
        Some(Arc::new(e)),
    )
}

impl fmt::Debug for RefVisibilityControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefVisibilityControl")
            .field("identity", self.identity())
            .field("project", &self.control.name())
            .finish()
    }
}

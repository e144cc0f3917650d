use tracing::warn;

use crate::error::{ReviewError, ReviewResult};
use crate::models::{Role, User};
use crate::session::Session;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Upload,
    PatientBatches,
    OwnRecords,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub full_name: String,
    pub initials: String,
    pub email: String,
    pub role: Role,
    pub sections: Vec<Section>,
}

impl Dashboard {
    pub fn role_label(&self) -> &'static str {
        self.role.display_name()
    }

    pub fn shows(&self, section: Section) -> bool {
        self.sections.contains(&section)
    }
}

/// Which sections a role sees.
pub fn sections_for(role: Role) -> Vec<Section> {
    match role {
        Role::Doctor => vec![Section::Upload, Section::PatientBatches],
        Role::Patient => vec![Section::OwnRecords],
    }
}

pub fn dashboard_for(user: &User) -> Dashboard {
    let initials = [&user.first_name, &user.last_name]
        .iter()
        .filter_map(|name| name.chars().next())
        .collect();

    Dashboard {
        full_name: user.full_name(),
        initials,
        email: user.email.clone(),
        role: user.role,
        sections: sections_for(user.role),
    }
}

pub async fn load_dashboard(store: &dyn RecordStore, session: &Session) -> ReviewResult<Dashboard> {
    match store.get_user(session.user_id()).await? {
        Some(user) => Ok(dashboard_for(&user)),
        None => {
            warn!(user_id = %session.user_id(), "no user document for signed-in principal");
            Err(ReviewError::NotFound("User data".to_string()))
        }
    }
}

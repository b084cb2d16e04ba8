use tally_common::api::WorkspaceData;

/// Workspaces only ever arrive from the server; this client never
/// creates or edits them.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    pub local_id: i64,
    pub id: u64,
    pub name: String,
    pub premium: bool,
    pub admin: bool,
    pub only_admins_may_create_projects: bool,
    /// Needs a store write.
    pub dirty: bool,
}

impl Workspace {
    pub fn from_data(data: &WorkspaceData) -> Self {
        Self {
            local_id: 0,
            id: data.id,
            name: data.name.clone(),
            premium: data.premium,
            admin: data.admin,
            only_admins_may_create_projects: data.only_admins_may_create_projects,
            dirty: true,
        }
    }

    pub fn update_from(&mut self, data: &WorkspaceData) {
        let incoming = Self {
            local_id: self.local_id,
            dirty: self.dirty,
            ..Self::from_data(data)
        };
        if *self != incoming {
            *self = Self {
                dirty: true,
                ..incoming
            };
        }
    }
}

use tally_common::api::ProjectData;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub local_id: i64,
    pub id: u64,
    pub guid: Option<Uuid>,
    pub wid: u64,
    pub cid: Option<u64>,
    pub name: String,
    pub color: String,
    pub active: bool,
    pub billable: bool,
    /// Needs a store write.
    pub dirty: bool,
}

impl Project {
    pub fn from_data(data: &ProjectData) -> Self {
        Self {
            local_id: 0,
            id: data.id,
            guid: data.guid,
            wid: data.wid,
            cid: data.cid,
            name: data.name.clone(),
            color: data.color.clone(),
            active: data.active,
            billable: data.billable,
            dirty: true,
        }
    }

    pub fn update_from(&mut self, data: &ProjectData) {
        let incoming = Self {
            local_id: self.local_id,
            guid: self.guid.or(data.guid),
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

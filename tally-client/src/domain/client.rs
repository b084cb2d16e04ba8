use tally_common::api::ClientData;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub local_id: i64,
    pub id: u64,
    pub guid: Option<Uuid>,
    pub wid: u64,
    pub name: String,
    /// Needs a store write.
    pub dirty: bool,
}

impl Client {
    pub fn from_data(data: &ClientData) -> Self {
        Self {
            local_id: 0,
            id: data.id,
            guid: data.guid,
            wid: data.wid,
            name: data.name.clone(),
            dirty: true,
        }
    }

    pub fn update_from(&mut self, data: &ClientData) {
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

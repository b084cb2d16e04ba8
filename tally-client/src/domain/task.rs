use tally_common::api::TaskData;

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub local_id: i64,
    pub id: u64,
    pub wid: u64,
    pub pid: Option<u64>,
    pub name: String,
    pub active: bool,
    /// Needs a store write.
    pub dirty: bool,
}

impl Task {
    pub fn from_data(data: &TaskData) -> Self {
        Self {
            local_id: 0,
            id: data.id,
            wid: data.wid,
            pid: data.pid,
            name: data.name.clone(),
            active: data.active,
            dirty: true,
        }
    }

    pub fn update_from(&mut self, data: &TaskData) {
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

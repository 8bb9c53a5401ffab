use backend_api::{ChangeKind, Profile, ProfileRecord, Status};

/// Result of applying one change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Inserted,
    Updated,
    Ignored,
}

/// Friends of the local user, in arrival order. Holds at most one entry per
/// id and never the local user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: Vec<Profile>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a full profile listing, skipping the local user and any
    /// repeated ids.
    pub fn from_profiles(profiles: Vec<Profile>, local_id: &str) -> Self {
        let mut roster = Roster::new();
        for profile in profiles {
            if profile.id != local_id && roster.get(&profile.id).is_none() {
                roster.entries.push(profile);
            }
        }
        roster
    }

    /// Apply an insert or update for a user other than `local_id`.
    ///
    /// An update for an unknown id is treated as an insert; an insert for a
    /// known id is ignored.
    pub fn apply(&mut self, kind: ChangeKind, record: &ProfileRecord, local_id: &str) -> Merge {
        if record.id == local_id {
            return Merge::Ignored;
        }
        if kind == ChangeKind::Update {
            if let Some(existing) = self.entries.iter_mut().find(|p| p.id == record.id) {
                existing.apply(&record.fields);
                return Merge::Updated;
            }
        }
        if self.get(&record.id).is_some() {
            return Merge::Ignored;
        }
        self.entries.push(Profile::from_record(record));
        Merge::Inserted
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.entries.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Friends to draw on the live map: available and with a known position.
    pub fn on_map(&self) -> impl Iterator<Item = &Profile> {
        self.entries
            .iter()
            .filter(|p| p.status == Some(Status::Available) && p.coordinates.is_some())
    }
}

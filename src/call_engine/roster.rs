//! Participant Roster
//!
//! Menge der verbundenen Remote-Teilnehmer. Eindeutige IDs, für die Anzeige
//! in Beitrittsreihenfolge.

/// Verbundene Remote-Teilnehmer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantRoster {
    peer_ids: Vec<u32>,
}

impl ParticipantRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fügt `uid` hinzu, falls noch nicht vorhanden. Gibt `true` bei Änderung zurück.
    pub fn on_joined(&mut self, uid: u32) -> bool {
        if self.contains(uid) {
            return false;
        }
        self.peer_ids.push(uid);
        true
    }

    /// Entfernt `uid`, falls vorhanden. Gibt `true` bei Änderung zurück.
    pub fn on_left(&mut self, uid: u32) -> bool {
        let before = self.peer_ids.len();
        self.peer_ids.retain(|&id| id != uid);
        self.peer_ids.len() != before
    }

    pub fn clear(&mut self) {
        self.peer_ids.clear();
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.peer_ids.clone()
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.peer_ids.contains(&uid)
    }

    pub fn len(&self) -> usize {
        self.peer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peer_ids.is_empty()
    }
}

use super::LifecycleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one physical index version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    Building,
    Ready,
    Active,
    Retired,
}

impl VersionState {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionState::Building => "BUILDING",
            VersionState::Ready => "READY",
            VersionState::Active => "ACTIVE",
            VersionState::Retired => "RETIRED",
        }
    }

    /// Allowed edges. `Retired -> Active` is a rollback.
    pub fn can_transition_to(self, next: VersionState) -> bool {
        matches!(
            (self, next),
            (VersionState::Building, VersionState::Ready)
                | (VersionState::Ready, VersionState::Active)
                | (VersionState::Active, VersionState::Retired)
                | (VersionState::Retired, VersionState::Active)
        )
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical namespace of a version: `<index>_v<N>`.
pub fn physical_name(index: &str, version: u32) -> String {
    format!("{index}_v{version}")
}

/// Catalog record of one version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexVersion {
    pub index: String,
    pub version: u32,
    pub physical_name: String,
    pub state: VersionState,
    pub doc_count: usize,
    pub embedded_count: usize,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl IndexVersion {
    /// A fresh BUILDING version.
    pub fn building(index: &str, version: u32, now: DateTime<Utc>) -> Self {
        Self {
            index: index.to_string(),
            version,
            physical_name: physical_name(index, version),
            state: VersionState::Building,
            doc_count: 0,
            embedded_count: 0,
            created_at: now,
            ready_at: None,
            activated_at: None,
            retired_at: None,
        }
    }

    /// Move to `next`, stamping the matching timestamp.
    pub fn transition(
        &mut self,
        next: VersionState,
        now: DateTime<Utc>,
    ) -> Result<VersionState, LifecycleError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                version: self.physical_name.clone(),
                from,
                to: next,
            });
        }
        match next {
            VersionState::Ready => self.ready_at = Some(now),
            VersionState::Active => {
                self.activated_at = Some(now);
                self.retired_at = None;
            }
            VersionState::Retired => self.retired_at = Some(now),
            VersionState::Building => {}
        }
        self.state = next;
        tracing::info!(
            event = "index.transition",
            index = %self.index,
            version = self.version,
            from = %from,
            to = %next,
            "index version transition"
        );
        Ok(from)
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }
}

/// The alias row: which version a logical index currently serves.
///
/// `generation` increments on every successful swap. Writers compare the
/// whole record they read, so a lost race is detected even when two swaps
/// target the same version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub alias: String,
    pub version: u32,
    pub physical_name: String,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl AliasRecord {
    /// The record that replaces `current` when pointing at `version`.
    pub fn next(
        alias: &str,
        current: Option<&AliasRecord>,
        version: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            alias: alias.to_string(),
            version,
            physical_name: physical_name(alias, version),
            generation: current.map(|c| c.generation + 1).unwrap_or(1),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_edges_only() {
        use VersionState::*;
        assert!(Building.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Active));
        assert!(Active.can_transition_to(Retired));
        assert!(Retired.can_transition_to(Active));
        assert!(!Building.can_transition_to(Active));
        assert!(!Ready.can_transition_to(Retired));
        assert!(!Retired.can_transition_to(Ready));
    }

    #[test]
    fn transition_stamps_times() {
        let now = Utc::now();
        let mut v = IndexVersion::building("clips", 3, now);
        assert_eq!(v.physical_name, "clips_v3");
        v.transition(VersionState::Ready, now).unwrap();
        assert_eq!(v.ready_at, Some(now));
        v.transition(VersionState::Active, now).unwrap();
        v.transition(VersionState::Retired, now).unwrap();
        assert_eq!(v.retired_at, Some(now));
        v.transition(VersionState::Active, now).unwrap();
        assert!(v.retired_at.is_none());
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let mut v = IndexVersion::building("clips", 1, Utc::now());
        let err = v.transition(VersionState::Active, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("BUILDING -> ACTIVE"));
        assert_eq!(v.state, VersionState::Building);
    }

    #[test]
    fn alias_generation_increments() {
        let now = Utc::now();
        let first = AliasRecord::next("clips", None, 1, now);
        assert_eq!(first.generation, 1);
        let second = AliasRecord::next("clips", Some(&first), 2, now);
        assert_eq!(second.generation, 2);
        assert_eq!(second.physical_name, "clips_v2");
    }
}

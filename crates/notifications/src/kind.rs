use core::str::FromStr;

use serde::{Deserialize, Serialize};

use paddock_core::DomainError;

/// Kind of horse lifecycle event a queued notification is about.
///
/// The wire form (queue table `type` column, JSON) is camelCase, matching what
/// the web application writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    /// A race result was imported for the horse.
    NewRace,
    /// The horse was registered (entered) for an upcoming race.
    HorseRegistered,
    /// The horse was declared as a starter, usually with its jockey.
    HorseDeclared,
    /// A training session was recorded.
    NewTraining,
}

impl NotificationType {
    pub const ALL: [NotificationType; 4] = [
        NotificationType::NewRace,
        NotificationType::HorseRegistered,
        NotificationType::HorseDeclared,
        NotificationType::NewTraining,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::NewRace => "newRace",
            NotificationType::HorseRegistered => "horseRegistered",
            NotificationType::HorseDeclared => "horseDeclared",
            NotificationType::NewTraining => "newTraining",
        }
    }

    /// Preference category a recipient can switch off.
    pub fn category(self) -> NotificationCategory {
        match self {
            NotificationType::NewRace => NotificationCategory::RaceResults,
            NotificationType::HorseRegistered => NotificationCategory::Registrations,
            NotificationType::HorseDeclared => NotificationCategory::Declarations,
            NotificationType::NewTraining => NotificationCategory::Trainings,
        }
    }
}

impl core::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown notification type: {s}")))
    }
}

/// Notification preference category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    RaceResults,
    Registrations,
    Declarations,
    Trainings,
}

impl core::fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            NotificationCategory::RaceResults => "race_results",
            NotificationCategory::Registrations => "registrations",
            NotificationCategory::Declarations => "declarations",
            NotificationCategory::Trainings => "trainings",
        };
        f.write_str(s)
    }
}

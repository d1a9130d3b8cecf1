use serde::{Deserialize, Serialize};

use focusmate_ai::Classification;
use focusmate_storage::Statistics;

use crate::grace::TabId;
use crate::scheduler::SessionSnapshot;

/// Outward signals for whatever renders the assistant (browser bridge, CLI)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FocusEvent {
    /// A fresh classification for a tab; cache hits are not re-announced
    Classified {
        tab: TabId,
        url: String,
        result: Classification,
    },
    ShowBlock {
        tab: TabId,
        reason: String,
        score: u8,
    },
    ClearUi {
        tab: TabId,
    },
    GraceStarted {
        tab: TabId,
        reason: String,
        seconds: u64,
    },
    /// Grace period ran out while the tab stayed on the page
    ForcedBlock {
        tab: TabId,
        reason: String,
    },
    StateChanged(SessionSnapshot),
    StatisticsChanged(Statistics),
}

impl FocusEvent {
    #[must_use]
    pub fn tab(&self) -> Option<TabId> {
        match self {
            Self::Classified { tab, .. }
            | Self::ShowBlock { tab, .. }
            | Self::ClearUi { tab }
            | Self::GraceStarted { tab, .. }
            | Self::ForcedBlock { tab, .. } => Some(*tab),
            Self::StateChanged(_) | Self::StatisticsChanged(_) => None,
        }
    }
}

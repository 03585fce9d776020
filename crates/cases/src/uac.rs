use serde::{Deserialize, Serialize};

use census_action_core::{CaseId, UacQidLinkId};
use census_action_events::Uac;

/// Association of a questionnaire id (and its UAC) with a case.
///
/// At most one link exists per `qid`; later events overwrite the case association
/// and the `active` flag in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UacQidLink {
    pub id: UacQidLinkId,
    pub qid: String,
    pub uac: Option<String>,
    pub case_id: Option<CaseId>,
    pub active: bool,
}

impl UacQidLink {
    /// First sighting of a qid.
    pub fn first_sighting(id: UacQidLinkId, uac: &Uac) -> Self {
        Self {
            id,
            qid: uac.questionnaire_id.clone(),
            uac: uac.uac.clone(),
            case_id: uac.case_id,
            active: uac.active,
        }
    }

    /// Apply a later event for the same qid. The UAC value itself never changes.
    pub fn apply(&mut self, uac: &Uac) {
        self.case_id = uac.case_id;
        self.active = uac.active;
    }

    /// Idempotent upsert: create on first sighting, otherwise overwrite in place.
    ///
    /// `new_id` is only called when no link exists yet.
    pub fn upsert(existing: Option<Self>, uac: &Uac, new_id: impl FnOnce() -> UacQidLinkId) -> Self {
        match existing {
            Some(mut link) => {
                link.apply(uac);
                link
            }
            None => Self::first_sighting(new_id(), uac),
        }
    }
}

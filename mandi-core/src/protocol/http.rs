use serde::{Deserialize, Serialize};

use crate::models::{GroupIcon, MessageType};
/*
    dto per le richieste http della community.
    Le liste (gruppi, messaggi) viaggiano come array JSON nudi, quindi qui ci sono solo i body in ingresso
    e la query di filtro.
*/

/// Query di `GET /groups?location=&crop=&farmingStyle=`. Ogni campo assente (o vuoto) viene ignorato.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farming_style: Option<String>,
}

impl GroupFilter {
    /// Normalizza i valori vuoti in `None`, come se il parametro non fosse stato passato.
    pub fn normalized(self) -> Self {
        fn keep(v: Option<String>) -> Option<String> {
            v.filter(|s| !s.trim().is_empty())
        }
        GroupFilter {
            location: keep(self.location),
            crop: keep(self.crop),
            farming_style: keep(self.farming_style),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.crop.is_none() && self.farming_style.is_none()
    }
}

/// Body di `POST /message`. I campi obbligatori hanno default vuoto così la validazione
/// restituisce un errore esplicito invece di un rifiuto generico del body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageType>,
}

/// Body di `POST /groups`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub crop: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farming_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<GroupIcon>,
}

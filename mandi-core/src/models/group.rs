use serde::{Deserialize, Serialize};

/// Gruppo di discussione (room) esposto sul wire.
///
/// `last_message` / `last_message_time` sono una proiezione dell'ultimo messaggio
/// del log del gruppo: vengono aggiornati solo dopo un append riuscito.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub location: String,
    pub crop: String,
    pub farming_style: String,
    /// Valore indicativo, non legato ai membri realmente connessi.
    pub members_count: i64,
    pub icon: GroupIcon,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub last_message_time: String, // RFC3339 UTC
    pub created_at: String,        // RFC3339 UTC
}

/// Glifo mostrato accanto al gruppo. I valori sconosciuti ricadono su `Groups`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GroupIcon {
    Wheat,
    Leaf,
    Water,
    Flask,
    #[default]
    Groups,
}

impl GroupIcon {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupIcon::Wheat => "wheat",
            GroupIcon::Leaf => "leaf",
            GroupIcon::Water => "water",
            GroupIcon::Flask => "flask",
            GroupIcon::Groups => "groups",
        }
    }
}

impl From<&str> for GroupIcon {
    fn from(tag: &str) -> Self {
        match tag {
            "wheat" => GroupIcon::Wheat,
            "leaf" => GroupIcon::Leaf,
            "water" => GroupIcon::Water,
            "flask" => GroupIcon::Flask,
            _ => GroupIcon::Groups,
        }
    }
}

impl From<String> for GroupIcon {
    fn from(tag: String) -> Self {
        GroupIcon::from(tag.as_str())
    }
}

impl From<GroupIcon> for String {
    fn from(icon: GroupIcon) -> Self {
        icon.as_str().to_string()
    }
}

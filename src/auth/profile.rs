use serde::{Deserialize, Serialize};

/// A skin attached to a game profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skin {
    pub id: String,
    pub state: String,
    pub url: String,
    #[serde(default)]
    pub texture_key: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

/// A cape attached to a game profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cape {
    pub id: String,
    pub state: String,
    pub url: String,
    #[serde(default)]
    pub alias: Option<String>,
}

/// The user's game profile, the final output of the sign-in chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub skins: Vec<Skin>,
    #[serde(default)]
    pub capes: Vec<Cape>,
}

impl Profile {
    /// The skin currently worn, if any.
    pub fn active_skin(&self) -> Option<&Skin> {
        self.skins.iter().find(|skin| skin.state == "ACTIVE")
    }
}

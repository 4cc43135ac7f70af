use crate::error::HubError;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    GoogleVoice,
    GoogleChat,
    GoogleMail,
    Facebook,
    Instagram,
}

/// Path keywords consulted in order; the first keyword found anywhere in the
/// lowercased relative path decides the platform.
pub const PLATFORM_PRECEDENCE: &[(&str, Platform)] = &[
    ("google chat", Platform::GoogleChat),
    ("facebook", Platform::Facebook),
    ("messenger", Platform::Facebook),
    ("instagram", Platform::Instagram),
];

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::GoogleVoice,
        Platform::GoogleChat,
        Platform::GoogleMail,
        Platform::Facebook,
        Platform::Instagram,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleVoice => "google_voice",
            Self::GoogleChat => "google_chat",
            Self::GoogleMail => "google_mail",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::GoogleVoice => "Google Voice",
            Self::GoogleChat => "Google Chat",
            Self::GoogleMail => "Google Mail",
            Self::Facebook => "Facebook",
            Self::Instagram => "Instagram",
        }
    }

    /// Queue weight. Structural units outrank recursively discovered ones.
    pub fn weight(self) -> u32 {
        match self {
            Self::GoogleVoice => 100,
            Self::GoogleMail => 90,
            Self::GoogleChat => 30,
            Self::Facebook => 20,
            Self::Instagram => 10,
        }
    }

    /// Sub-directory of the extraction root an export of this platform lands
    /// in. Google takeout bundles carry their own top-level tree.
    pub fn extraction_subdir(self) -> Option<&'static str> {
        match self {
            Self::Facebook => Some("Facebook"),
            Self::Instagram => Some("Instagram"),
            Self::GoogleVoice | Self::GoogleChat | Self::GoogleMail => None,
        }
    }

    /// Classify a unit path relative to the scan root.
    pub fn classify(relative: &Path) -> Option<Platform> {
        let haystack = relative.to_string_lossy().to_lowercase();
        PLATFORM_PRECEDENCE
            .iter()
            .find(|(keyword, _)| haystack.contains(keyword))
            .map(|(_, platform)| *platform)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = HubError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| HubError::UnknownPlatform(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlatformFilter {
    #[default]
    All,
    Only(Platform),
}

impl PlatformFilter {
    pub fn admits(self, platform: Platform) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == platform,
        }
    }

    /// True when at least one of `detected` passes the filter.
    pub fn admits_any(self, detected: &BTreeSet<Platform>) -> bool {
        detected.iter().any(|p| self.admits(*p))
    }
}

impl fmt::Display for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(p) => p.fmt(f),
        }
    }
}

impl FromStr for PlatformFilter {
    type Err = HubError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        raw.parse::<Platform>().map(Self::Only)
    }
}

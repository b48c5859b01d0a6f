// ABOUTME: Enumerates the chat sites the bot can connect to.
// ABOUTME: Each site carries its chat base URL and the login handshake it needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved "home" room every account can see; only logout may leave it
pub const HOME_ROOM_ID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    StackOverflow,
    StackExchange,
    MetaStackExchange,
}

/// Which scraped-HTML handshake logs an account in for a site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlow {
    /// Direct form login on stackoverflow.com
    StackOverflow,
    /// OpenID affiliate login through stackexchange.com
    OpenId,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::StackOverflow, Site::StackExchange, Site::MetaStackExchange];

    pub fn host(&self) -> &'static str {
        match self {
            Site::StackOverflow => "chat.stackoverflow.com",
            Site::StackExchange => "chat.stackexchange.com",
            Site::MetaStackExchange => "chat.meta.stackexchange.com",
        }
    }

    /// e.g. `https://chat.stackoverflow.com`
    pub fn base_url(&self) -> String {
        format!("https://{}", self.host())
    }

    pub fn login_flow(&self) -> LoginFlow {
        match self {
            Site::StackOverflow => LoginFlow::StackOverflow,
            Site::StackExchange | Site::MetaStackExchange => LoginFlow::OpenId,
        }
    }

    /// Upper-case name used for on-disk room markers
    pub fn key(&self) -> &'static str {
        match self {
            Site::StackOverflow => "STACKOVERFLOW",
            Site::StackExchange => "STACKEXCHANGE",
            Site::MetaStackExchange => "METASTACKEXCHANGE",
        }
    }

    pub fn room_url(&self, room_id: u64) -> String {
        format!("{}/rooms/{}", self.base_url(), room_id)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "STACKOVERFLOW" | "SO" => Ok(Site::StackOverflow),
            "STACKEXCHANGE" | "SE" => Ok(Site::StackExchange),
            "METASTACKEXCHANGE" | "MSE" => Ok(Site::MetaStackExchange),
            _ => Err(format!("Unknown chat site: {}", s)),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Level of the scope hierarchy. Each level is one physical store with its own key.
///
/// The hierarchy is declared here and nowhere else: [`ScopeType::containers`]
/// says where a scope's entry lives and [`ScopeType::sealing`] says what its
/// key is sealed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Master,
    Account,
    User,
    Shelf,
    Collection,
}

/// What a scope's key is sealed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sealing {
    /// Master has no key of its own
    None,
    /// `Seal(passphrase, key)`: salt, nonce and ciphertext
    Passphrase,
    /// `Encrypt(container_key, key)`: nonce and ciphertext
    ContainerKey,
}

impl ScopeType {
    pub const ALL: [ScopeType; 5] = [
        ScopeType::Master,
        ScopeType::Account,
        ScopeType::User,
        ScopeType::Shelf,
        ScopeType::Collection,
    ];

    /// Scope kinds whose store holds this kind's entry
    pub const fn containers(self) -> &'static [ScopeType] {
        match self {
            ScopeType::Master => &[],
            ScopeType::Account => &[ScopeType::Master],
            ScopeType::User => &[ScopeType::Account],
            ScopeType::Shelf => &[ScopeType::Account, ScopeType::User],
            ScopeType::Collection => &[ScopeType::Shelf],
        }
    }

    pub const fn sealing(self) -> Sealing {
        match self {
            ScopeType::Master => Sealing::None,
            ScopeType::Account | ScopeType::User => Sealing::Passphrase,
            ScopeType::Shelf | ScopeType::Collection => Sealing::ContainerKey,
        }
    }

    pub fn is_contained_in(self, container: ScopeType) -> bool {
        self.containers().contains(&container)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ScopeType::Master => "master",
            ScopeType::Account => "account",
            ScopeType::User => "user",
            ScopeType::Shelf => "shelf",
            ScopeType::Collection => "collection",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal identifier of a scope (UUID v4; Master uses the nil UUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(Uuid);

impl ScopeId {
    pub const MASTER: ScopeId = ScopeId(Uuid::nil());

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for ScopeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifies exactly one physical store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub kind: ScopeType,
    pub id: ScopeId,
}

impl ScopeKey {
    pub const MASTER: ScopeKey = ScopeKey {
        kind: ScopeType::Master,
        id: ScopeId::MASTER,
    };

    pub const fn new(kind: ScopeType, id: ScopeId) -> Self {
        Self { kind, id }
    }

    pub const fn account(id: ScopeId) -> Self {
        Self::new(ScopeType::Account, id)
    }

    pub const fn user(id: ScopeId) -> Self {
        Self::new(ScopeType::User, id)
    }

    pub const fn shelf(id: ScopeId) -> Self {
        Self::new(ScopeType::Shelf, id)
    }

    pub const fn collection(id: ScopeId) -> Self {
        Self::new(ScopeType::Collection, id)
    }

    pub fn is_master(&self) -> bool {
        self.kind == ScopeType::Master
    }

    /// On-disk name of the store, relative to the data directory
    pub fn file_name(&self) -> String {
        match self.kind {
            ScopeType::Master => "master.db".to_string(),
            _ => format!("{}.db", self.id),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

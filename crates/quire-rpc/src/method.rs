use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Every RPC method, named on the wire by its variant name in `x-quire-method`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter, IntoStaticStr,
)]
pub enum Method {
    /// Handshake: registers a client token. Not signed or sequenced by the client.
    KeyExchange,
    /// Liveness. Answered with an unsigned `pong`.
    Ping,

    CreateAccount,
    SignIn,
    SignOut,
    CreateUser,
    SignInUser,

    CreateShelf,
    ListShelves,
    DeleteShelf,
    CreateCollection,
    ListCollections,
    DeleteCollection,

    SaveRecord,
    ListRecords,
    DeleteRecord,
}

impl Method {
    /// Methods that skip token, sequence and signature checks
    pub fn is_transport(self) -> bool {
        matches!(self, Method::KeyExchange | Method::Ping)
    }
}

use crate::status::Status;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    // --- protocol framing ---
    #[error("invalid routing byte")]
    InvalidRouting,
    #[error("invalid split byte")]
    InvalidSplit,
    #[error("wrong node id")]
    WrongNode,
    #[error("wrong coin id")]
    WrongCoinId,
    #[error("unknown command group: {0}")]
    UnknownGroup(u8),
    #[error("unknown command {1} in group {0}")]
    UnknownCommand(u8, u8),
    #[error("shard out of range: {0}")]
    ShardOutOfRange(u8),
    #[error("unknown encryption type: {0}")]
    UnknownEncryption(u8),
    #[error("packet length invalid: {0}")]
    InvalidPacketLength(usize),
    #[error("unexpected eof reading frame")]
    UnexpectedEof,
    #[error("challenge CRC32 mismatch")]
    InvalidCrc,

    // --- cryptography ---
    #[error("coin not found: den={0} sn={1}")]
    CoinNotFound(i8, u32),
    #[error("invalid encryption configuration: {0}")]
    InvalidEncryption(String),
    #[error("hardware AES support unavailable")]
    HwAesUnavailable,

    // --- resource ---
    #[error("memory allocation failed: {0}")]
    MemoryAlloc(String),
    #[error("ticket pool exhausted")]
    TicketExhausted,

    // --- authorization ---
    #[error("admin authentication failed")]
    AdminAuth,
    #[error("page not reserved by session {0}")]
    PageNotReserved(u32),
    #[error("rate limited")]
    RateLimited,

    // --- semantic ---
    #[error("invalid serial number or denomination")]
    InvalidSnOrDenomination,
    #[error("invalid proposed AN")]
    InvalidPan,
    #[error("amount mismatch")]
    AmountMismatch,
    #[error("bad coins in request")]
    BadCoins,
    #[error("coin count not divisible by required ratio")]
    CoinsNotDivisible,
    #[error("wrong RAIDA/peer count")]
    WrongRaida,
    #[error("ticket already claimed by peer {0}")]
    TicketAlreadyClaimed(u8),
    #[error("ticket not found or expired: {0}")]
    TicketNotFound(u32),

    // --- filesystem ---
    #[error("object does not exist: {0}")]
    FileNotExist(String),
    #[error("filesystem io error: {0}")]
    FilesystemIo(String),
    /// Sandbox escape is deliberately reported to the wire as `AdminAuth`
    /// (spec §7) so the detail never leaves the node; kept distinct
    /// internally for logging.
    #[error("path escapes sandbox root")]
    SandboxEscape,

    // --- internal ---
    #[error("internal error: {0}")]
    Internal(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NodeError {
    /// Map an error kind to the wire status byte the connection reports.
    /// Error codes never leak internal detail onto the wire (spec §7).
    pub fn status(&self) -> Status {
        use NodeError::*;
        match self {
            InvalidRouting => Status::InvalidRouting,
            InvalidSplit => Status::InvalidSplit,
            WrongNode => Status::InvalidNode,
            WrongCoinId => Status::InvalidCoinId,
            UnknownGroup(_) => Status::InvalidGroup,
            UnknownCommand(_, _) => Status::InvalidCommand,
            ShardOutOfRange(_) => Status::InvalidShard,
            UnknownEncryption(_) => Status::InvalidEncryption,
            InvalidPacketLength(_) => Status::InvalidPacketLength,
            UnexpectedEof => Status::UnexpectedEof,
            InvalidCrc => Status::InvalidCrc,
            CoinNotFound(_, _) => Status::CoinNotFound,
            InvalidEncryption(_) => Status::InvalidEncryption,
            HwAesUnavailable => Status::HwAesUnavailable,
            MemoryAlloc(_) => Status::MemoryAlloc,
            TicketExhausted => Status::TicketExhausted,
            AdminAuth => Status::AdminAuth,
            PageNotReserved(_) => Status::PageNotReserved,
            RateLimited => Status::RateLimited,
            InvalidSnOrDenomination => Status::InvalidSnOrDenomination,
            InvalidPan => Status::InvalidPan,
            AmountMismatch => Status::AmountMismatch,
            BadCoins => Status::BadCoins,
            CoinsNotDivisible => Status::CoinsNotDivisible,
            WrongRaida => Status::WrongRaida,
            TicketAlreadyClaimed(_) => Status::TicketAlreadyClaimed,
            TicketNotFound(_) => Status::TicketNotFound,
            FileNotExist(_) => Status::FileNotExist,
            FilesystemIo(_) => Status::FilesystemIo,
            // sandbox escape never surfaces as its own status code
            SandboxEscape => Status::AdminAuth,
            Internal(_) | Io(_) | Configuration(_) | Serialization(_) => Status::Unexpected,
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;

// Wire protocol: header parsing (component F), body codec (component F),
// and command dispatch (component G).

pub mod codec;
pub mod dispatch;
pub mod header;

pub use codec::{derive_key, Key, ResponsePlan};
pub use dispatch::{DispatchTable, HandlerContext, HandlerFn};
pub use header::Header;

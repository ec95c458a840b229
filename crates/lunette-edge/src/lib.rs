//! Request handling for the Lunette dev server.
//!
//! The handler is assembled from three small capabilities:
//! - [`PathResolver`] confines request targets to a root directory;
//! - [`ContentTypeResolver`] picks the media type, with overrides for 3D and
//!   WASM assets that generic tables misclassify;
//! - [`ResponsePolicy`] attaches the CORS and no-cache headers.
//!
//! [`StaticSiteHandler`] composes them to answer `GET` and `OPTIONS`.

pub mod error;
pub mod handler;
pub mod mime;
pub mod path;
pub mod policy;
pub mod request;
pub mod response;

pub use error::{EdgeError, EdgeResult};
pub use handler::{normalize_extension, ServeHandler, SiteConfig, StaticSiteHandler};
pub use mime::{ContentTypeResolver, ContentTypeTable};
pub use path::{PathResolver, ResolvedRequest, RootedPathResolver, DEFAULT_INDEX};
pub use policy::{BodyInfo, DevResponsePolicy, ResponsePolicy};
pub use request::EdgeRequest;
pub use response::EdgeResponse;

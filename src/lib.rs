// Trawler - a typed client for OpenSearch/Elasticsearch clusters
//
// This library binds document types to indices behind stable aliases, stores
// and fetches them by engine id, and drains searches to completion over the
// scroll protocol.

// Re-export the client
pub use trawler_search::*;

// Re-export logging
pub use trawler_log;

// Re-export optional crates
#[cfg(feature = "config")]
pub use trawler_config;

// Prelude for common imports
pub mod prelude {
    pub use trawler_search::prelude::*;

    pub use trawler_search::{
        AliasManager, IndexBootstrapper, IndexDescriptor, MemoryTransport, RequestObserver,
        TlsConfig,
    };
}

pub mod ant_path;
pub mod api;
pub mod binder;
pub mod chain;
pub mod context;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod rate_limit;
pub mod registry;
pub mod resource;

pub use api::{Api, ApiStatus, ApiType, RequestMethod};
pub use binder::{FilterBinder, FilterRegistry};
pub use chain::FilterChainExecutor;
pub use context::{ChainState, DispatchResponse, RequestContext, RequestInfo};
pub use error::GatewayError;
pub use filter::{DynFilterFactory, ErrorResponse, Filter, FilterError, FilterFactory, FilterList, FilterRef};
pub use gateway::{DispatchService, RouteTable};
pub use rate_limit::{Classification, RateLimitMatcher};
pub use registry::ApiRegistry;
pub use resource::{Resolution, ResourceTree, RouteMatch, RouteMethod};

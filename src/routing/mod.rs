mod table;

pub use table::{RouteMatch, RoutingTable, WILDCARD};

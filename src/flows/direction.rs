use beyla_network_common::{direction, Endpoint, FlowRecord};

/// Which endpoint of a flow record plays the client role
///
/// Read from the producer's `FlowDirection` label. This is a heuristic the
/// producer assigns; the record itself does not know who initiated the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientIsSource,
    ClientIsDestination,
}

impl Direction {
    /// `1` means the source is the client. Anything else, including a missing
    /// or mistyped field, means the source is the server.
    pub fn from_raw(raw: i64) -> Self {
        if raw == direction::CLIENT_IS_SOURCE {
            Direction::ClientIsSource
        } else {
            Direction::ClientIsDestination
        }
    }

    pub fn of(record: &FlowRecord) -> Self {
        Self::from_raw(record.flow_direction())
    }

    pub const fn opposite(self) -> Self {
        match self {
            Direction::ClientIsSource => Direction::ClientIsDestination,
            Direction::ClientIsDestination => Direction::ClientIsSource,
        }
    }

    /// Endpoint whose fields describe the role labelled by this direction
    pub const fn endpoint(self) -> Endpoint {
        match self {
            Direction::ClientIsSource => Endpoint::Source,
            Direction::ClientIsDestination => Endpoint::Destination,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientIsSource => write!(f, "client-is-source"),
            Direction::ClientIsDestination => write!(f, "client-is-destination"),
        }
    }
}

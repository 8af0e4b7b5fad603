//! Typed command records produced by the parser.

use geosim_types::GpsLocation;

/// Selection of servers within a named group: `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRange {
    pub group: String,
    pub index: u32,
    pub count: u32,
}

/// Selection of identities or activities within a named group, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalRange {
    pub group: String,
    pub index: u32,
    pub count: u32,
}

/// Arguments of `ProfileServer` / `ProximityServer`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateServers {
    pub group: String,
    pub count: u32,
    pub base_port: u16,
    /// Center of the placement disc.
    pub location: GpsLocation,
    /// Placement disc radius in metres.
    pub radius: u32,
}

/// Arguments of `Identity`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIdentities {
    pub name: String,
    pub create_count: u32,
    pub identity_type: String,
    pub location: GpsLocation,
    pub radius: u32,
    /// Filename mask for profile images, e.g. `*.jpg`.
    pub profile_image_mask: String,
    /// Percent chance [0, 100] an identity gets a profile image.
    pub profile_image_chance: u32,
    pub thumbnail_mask: String,
    pub thumbnail_chance: u32,
    /// Profile servers that will host the identities.
    pub servers: ServerRange,
}

/// Arguments of `Activity`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateActivities {
    pub name: String,
    pub create_count: u32,
    pub location: GpsLocation,
    pub radius: u32,
    pub precision_min: u32,
    pub precision_max: u32,
    /// Start-time offset range in seconds relative to now.
    pub start_from: i32,
    pub start_to: i32,
    /// Lifetime range in seconds.
    pub lifetime_from: i32,
    pub lifetime_to: i32,
    /// Identities that will own the activities.
    pub owners: PositionalRange,
}

/// Arguments of `TestQuery`.
#[derive(Debug, Clone, PartialEq)]
pub struct TestQuery {
    /// Profile servers to query.
    pub servers: ServerRange,
    /// Name filter; `**` disables it.
    pub name_filter: String,
    /// Type filter; `**` disables it.
    pub type_filter: String,
    pub include_images: bool,
    /// `None` when the scenario used the `NO_LOCATION` sentinel.
    pub location: Option<GpsLocation>,
    pub radius: u32,
}

/// Arguments of `TestQueryActivity`.
#[derive(Debug, Clone, PartialEq)]
pub struct TestQueryActivity {
    /// Proximity servers to query.
    pub servers: ServerRange,
    pub type_filter: String,
    /// `None` when the scenario used the `ANY` sentinel.
    pub start_not_after: Option<i64>,
    pub expiration_not_before: Option<i64>,
    pub location: Option<GpsLocation>,
    pub radius: u32,
}

/// One parsed scenario command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ProfileServer(CreateServers),
    ProximityServer(CreateServers),
    StartServer(ServerRange),
    StopServer(ServerRange),
    Neighborhood(Vec<ServerRange>),
    CancelNeighborhood(Vec<ServerRange>),
    Neighbor {
        source: String,
        targets: Vec<String>,
    },
    CancelNeighbor {
        source: String,
        targets: Vec<String>,
    },
    Identity(CreateIdentities),
    CancelIdentity {
        name: String,
        index: u32,
        count: u32,
    },
    Activity(CreateActivities),
    DeleteActivity {
        name: String,
        index: u32,
        count: u32,
    },
    TestQuery(TestQuery),
    TestQueryActivity(TestQueryActivity),
    Delay {
        seconds: f64,
    },
    TakeSnapshot {
        name: String,
    },
    LoadSnapshot {
        name: String,
    },
    DebugMode {
        enabled: bool,
    },
}

impl Command {
    /// The command keyword as written in scenarios.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::ProfileServer(_) => "ProfileServer",
            Command::ProximityServer(_) => "ProximityServer",
            Command::StartServer(_) => "StartServer",
            Command::StopServer(_) => "StopServer",
            Command::Neighborhood(_) => "Neighborhood",
            Command::CancelNeighborhood(_) => "CancelNeighborhood",
            Command::Neighbor { .. } => "Neighbor",
            Command::CancelNeighbor { .. } => "CancelNeighbor",
            Command::Identity(_) => "Identity",
            Command::CancelIdentity { .. } => "CancelIdentity",
            Command::Activity(_) => "Activity",
            Command::DeleteActivity { .. } => "DeleteActivity",
            Command::TestQuery(_) => "TestQuery",
            Command::TestQueryActivity(_) => "TestQueryActivity",
            Command::Delay { .. } => "Delay",
            Command::TakeSnapshot { .. } => "TakeSnapshot",
            Command::LoadSnapshot { .. } => "LoadSnapshot",
            Command::DebugMode { .. } => "DebugMode",
        }
    }
}

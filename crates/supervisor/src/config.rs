//! Configuration file synthesis for child servers.
//!
//! Children consume a flat `key = value` file; the keys differ slightly
//! between the two server kinds.

use geosim_types::{ServerInner, ServerKind, MAX_ACTIVITIES, MAX_IDENTITIES};

/// Offset of the CAN API port inside the reserved block.
const CAN_API_OFFSET: u16 = 6;

/// Render the full configuration file for a server.
pub fn render_config(inner: &ServerInner) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut push = |key: &str, value: String| lines.push(format!("{key} = {value}"));

    push("test_mode", "on".to_string());
    push("external_server_address", "127.0.0.1".to_string());
    push("bind_to_interface", "127.0.0.1".to_string());
    push("primary_interface_port", inner.primary_port().to_string());

    match inner.kind {
        ServerKind::Profile => {
            push(
                "server_neighbor_interface_port",
                inner.neighbor_port().to_string(),
            );
            push(
                "client_non_customer_interface_port",
                inner.client_port().to_string(),
            );
            push(
                "client_customer_interface_port",
                inner.customer_port().to_string(),
            );
            push(
                "client_app_service_interface_port",
                (inner.base_port + 5).to_string(),
            );
        }
        ServerKind::Proximity => {
            push("neighbor_interface_port", inner.neighbor_port().to_string());
            push("client_interface_port", inner.client_port().to_string());
        }
    }

    push("tls_server_certificate", "server.pem".to_string());
    push("image_data_folder", "images".to_string());
    push("tmp_data_folder", "tmp".to_string());

    match inner.kind {
        ServerKind::Profile => {
            push("db_file_name", "ProfileServer.db".to_string());
            push("max_hosted_identities", MAX_IDENTITIES.to_string());
            push("max_identity_relations", "100".to_string());
        }
        ServerKind::Proximity => {
            push("db_file_name", "ProximityServer.db".to_string());
            push("max_activities", MAX_ACTIVITIES.to_string());
        }
    }

    push("neighborhood_initialization_parallelism", "10".to_string());
    push("loc_port", inner.loc_port().to_string());

    match inner.kind {
        ServerKind::Profile => {
            push("neighbor_profiles_expiration_time", "86400".to_string());
        }
        ServerKind::Proximity => {
            push("neighbor_expiration_time", "86400".to_string());
        }
    }

    push("max_neighborhood_size", "110".to_string());
    push("max_follower_servers_count", "200".to_string());
    push("follower_refresh_time", "43200".to_string());
    push("can_api_port", (inner.base_port + CAN_API_OFFSET).to_string());

    lines.join("\n") + "\n"
}

/// Configuration file name for a server kind.
pub fn config_file_name(kind: ServerKind) -> &'static str {
    match kind {
        ServerKind::Profile => "ProfileServer.conf",
        ServerKind::Proximity => "ProximityServer.conf",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosim_types::GpsLocation;

    fn inner(kind: ServerKind) -> ServerInner {
        let location = GpsLocation::new(10.0, 20.0).unwrap();
        ServerInner::new("A001", kind, location, 10000)
    }

    #[test]
    fn profile_config_carries_role_keys() {
        let config = render_config(&inner(ServerKind::Profile));
        assert!(config.contains("test_mode = on"));
        assert!(config.contains("primary_interface_port = 10001"));
        assert!(config.contains("server_neighbor_interface_port = 10002"));
        assert!(config.contains("client_non_customer_interface_port = 10003"));
        assert!(config.contains("client_customer_interface_port = 10004"));
        assert!(config.contains("max_hosted_identities = 20000"));
        assert!(config.contains("max_identity_relations = 100"));
        assert!(config.contains("neighbor_profiles_expiration_time = 86400"));
        assert!(config.contains("loc_port = 10000"));
        assert!(!config.contains("max_activities"));
    }

    #[test]
    fn proximity_config_carries_role_keys() {
        let config = render_config(&inner(ServerKind::Proximity));
        assert!(config.contains("neighbor_interface_port = 10002"));
        assert!(config.contains("client_interface_port = 10003"));
        assert!(config.contains("max_activities = 50000"));
        assert!(config.contains("neighbor_expiration_time = 86400"));
        assert!(!config.contains("max_hosted_identities"));
        assert!(!config.contains("server_neighbor_interface_port"));
    }

    #[test]
    fn every_line_is_key_equals_value() {
        let config = render_config(&inner(ServerKind::Profile));
        for line in config.lines() {
            assert!(line.contains(" = "), "bad config line: {line}");
        }
    }
}

//! Tokenizer and validator for scenario files.

use crate::command::{
    Command, CreateActivities, CreateIdentities, CreateServers, PositionalRange, ServerRange,
    TestQuery, TestQueryActivity,
};
use geosim_types::{GpsLocation, PORTS_PER_SERVER};
use thiserror::Error;

/// Sentinel disabling the location filter of a test query.
pub const NO_LOCATION: &str = "NO_LOCATION";

/// Sentinel disabling a time filter of an activity test query.
pub const ANY: &str = "ANY";

/// Errors aborting a scenario parse.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// First token of a line is not a known command.
    #[error("line {line}: unknown command '{keyword}'")]
    UnknownCommand { line: usize, keyword: String },

    /// Wrong number of arguments for the command.
    #[error("line {line}: {keyword} expects {expected} arguments, got {got}")]
    ArgumentCount {
        line: usize,
        keyword: &'static str,
        expected: &'static str,
        got: usize,
    },

    /// A token failed to parse or violated its range constraint.
    #[error("line {line}: invalid {what} '{token}': {constraint}")]
    InvalidValue {
        line: usize,
        what: &'static str,
        token: String,
        constraint: String,
    },

    /// Two server commands reserve overlapping port blocks.
    #[error(
        "line {line}: port block {start}..={end} of group '{group}' overlaps group '{other}'"
    )]
    PortOverlap {
        line: usize,
        group: String,
        start: u16,
        end: u16,
        other: String,
    },

    /// A server/identity/activity group name was declared twice.
    #[error("line {line}: duplicate group name '{group}'")]
    DuplicateGroup { line: usize, group: String },

    /// `LoadSnapshot` may only be the first command of a scenario.
    #[error("line {line}: LoadSnapshot must be the first command")]
    LoadSnapshotNotFirst { line: usize },
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a full scenario into an ordered command sequence.
pub fn parse_scenario(text: &str) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    // (group, first port, last port) of every reserved block so far.
    let mut port_blocks: Vec<(String, u16, u16)> = Vec::new();
    let mut server_groups: Vec<String> = Vec::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = trimmed.split(' ').filter(|t| !t.is_empty()).collect();
        let command = parse_command(line, &tokens)?;

        match &command {
            Command::ProfileServer(create) | Command::ProximityServer(create) => {
                if server_groups.contains(&create.group) {
                    return Err(ParseError::DuplicateGroup {
                        line,
                        group: create.group.clone(),
                    });
                }
                let start = create.base_port;
                let end = create.base_port + PORTS_PER_SERVER * create.count as u16 - 1;
                for (other, other_start, other_end) in &port_blocks {
                    if start <= *other_end && *other_start <= end {
                        return Err(ParseError::PortOverlap {
                            line,
                            group: create.group.clone(),
                            start,
                            end,
                            other: other.clone(),
                        });
                    }
                }
                port_blocks.push((create.group.clone(), start, end));
                server_groups.push(create.group.clone());
            }
            Command::LoadSnapshot { .. } => {
                if !commands.is_empty() {
                    return Err(ParseError::LoadSnapshotNotFirst { line });
                }
            }
            _ => {}
        }

        commands.push(command);
    }

    Ok(commands)
}

fn parse_command(line: usize, tokens: &[&str]) -> Result<Command> {
    let keyword = tokens[0];
    let args = &tokens[1..];
    match keyword {
        "ProfileServer" => Ok(Command::ProfileServer(parse_create_servers(line, args)?)),
        "ProximityServer" => Ok(Command::ProximityServer(parse_create_servers(line, args)?)),
        "StartServer" => Ok(Command::StartServer(parse_server_range_cmd(
            line, "StartServer", args,
        )?)),
        "StopServer" => Ok(Command::StopServer(parse_server_range_cmd(
            line, "StopServer", args,
        )?)),
        "Neighborhood" => Ok(Command::Neighborhood(parse_triples(
            line,
            "Neighborhood",
            args,
        )?)),
        "CancelNeighborhood" => Ok(Command::CancelNeighborhood(parse_triples(
            line,
            "CancelNeighborhood",
            args,
        )?)),
        "Neighbor" => parse_neighbor(line, "Neighbor", args, false),
        "CancelNeighbor" => parse_neighbor(line, "CancelNeighbor", args, true),
        "Identity" => Ok(Command::Identity(parse_identity(line, args)?)),
        "CancelIdentity" => {
            expect_args(line, "CancelIdentity", "3", args, 3)?;
            let index = parse_u32(line, "index", args[1], 1, 99_999)?;
            let count = parse_u32(line, "count", args[2], 1, 99_999)?;
            check_sum(line, "index + count", args[2], index, count, 100_000)?;
            Ok(Command::CancelIdentity {
                name: args[0].to_string(),
                index,
                count,
            })
        }
        "Activity" => Ok(Command::Activity(parse_activity(line, args)?)),
        "DeleteActivity" => {
            expect_args(line, "DeleteActivity", "3", args, 3)?;
            let index = parse_u32(line, "index", args[1], 1, 50_000)?;
            let count = parse_u32(line, "count", args[2], 1, 50_000)?;
            check_sum(line, "index + count", args[2], index, count, 50_001)?;
            Ok(Command::DeleteActivity {
                name: args[0].to_string(),
                index,
                count,
            })
        }
        "TestQuery" => Ok(Command::TestQuery(parse_test_query(line, args)?)),
        "TestQueryActivity" => Ok(Command::TestQueryActivity(parse_test_query_activity(
            line, args,
        )?)),
        "Delay" => {
            expect_args(line, "Delay", "1", args, 1)?;
            let seconds = parse_f64(line, "seconds", args[0])?;
            if seconds <= 0.0 {
                return Err(invalid(line, "seconds", args[0], "must be > 0"));
            }
            Ok(Command::Delay { seconds })
        }
        "TakeSnapshot" => {
            expect_args(line, "TakeSnapshot", "1", args, 1)?;
            Ok(Command::TakeSnapshot {
                name: args[0].to_string(),
            })
        }
        "LoadSnapshot" => {
            expect_args(line, "LoadSnapshot", "1", args, 1)?;
            Ok(Command::LoadSnapshot {
                name: args[0].to_string(),
            })
        }
        "DebugMode" => {
            expect_args(line, "DebugMode", "1", args, 1)?;
            match args[0] {
                "on" => Ok(Command::DebugMode { enabled: true }),
                "off" => Ok(Command::DebugMode { enabled: false }),
                other => Err(invalid(line, "mode", other, "expected 'on' or 'off'")),
            }
        }
        other => Err(ParseError::UnknownCommand {
            line,
            keyword: other.to_string(),
        }),
    }
}

fn parse_create_servers(line: usize, args: &[&str]) -> Result<CreateServers> {
    expect_args(line, "ProfileServer/ProximityServer", "6", args, 6)?;
    let group = args[0].to_string();
    let count = parse_u32(line, "count", args[1], 1, 999)?;
    let max_base = 65_535 - u32::from(PORTS_PER_SERVER) * count;
    let base_port = parse_u32(line, "basePort", args[2], 1, max_base)? as u16;
    let location = parse_location(line, args[3], args[4])?;
    let radius = parse_u32(line, "radius", args[5], 0, 20_000_000)?;
    Ok(CreateServers {
        group,
        count,
        base_port,
        location,
        radius,
    })
}

fn parse_server_range_cmd(line: usize, keyword: &'static str, args: &[&str]) -> Result<ServerRange> {
    expect_args(line, keyword, "3", args, 3)?;
    parse_server_range(line, args[0], args[1], args[2])
}

fn parse_server_range(line: usize, group: &str, index: &str, count: &str) -> Result<ServerRange> {
    let index_v = parse_u32(line, "index", index, 1, 999)?;
    let count_v = parse_u32(line, "count", count, 1, 999)?;
    check_sum(line, "index + count", count, index_v, count_v, 1000)?;
    Ok(ServerRange {
        group: group.to_string(),
        index: index_v,
        count: count_v,
    })
}

fn parse_triples(line: usize, keyword: &'static str, args: &[&str]) -> Result<Vec<ServerRange>> {
    if args.is_empty() || args.len() % 3 != 0 {
        return Err(ParseError::ArgumentCount {
            line,
            keyword,
            expected: "a non-empty multiple of 3",
            got: args.len(),
        });
    }
    args.chunks(3)
        .map(|chunk| parse_server_range(line, chunk[0], chunk[1], chunk[2]))
        .collect()
}

fn parse_neighbor(line: usize, keyword: &'static str, args: &[&str], cancel: bool) -> Result<Command> {
    if args.len() < 2 {
        return Err(ParseError::ArgumentCount {
            line,
            keyword,
            expected: "at least 2",
            got: args.len(),
        });
    }
    let source = args[0].to_string();
    let targets = args[1..].iter().map(|t| t.to_string()).collect();
    Ok(if cancel {
        Command::CancelNeighbor { source, targets }
    } else {
        Command::Neighbor { source, targets }
    })
}

fn parse_identity(line: usize, args: &[&str]) -> Result<CreateIdentities> {
    expect_args(line, "Identity", "13", args, 13)?;
    let name = args[0].to_string();
    let create_count = parse_u32(line, "createCount", args[1], 1, 99_999)?;
    let identity_type = args[2].to_string();
    let location = parse_location(line, args[3], args[4])?;
    let radius = parse_u32(line, "radius", args[5], 0, 20_000_000)?;
    let profile_image_mask = args[6].to_string();
    let profile_image_chance = parse_u32(line, "profileChance", args[7], 0, 100)?;
    let thumbnail_mask = args[8].to_string();
    let thumbnail_chance = parse_u32(line, "thumbChance", args[9], 0, 100)?;
    let servers = parse_server_range(line, args[10], args[11], args[12])?;

    if create_count > 20_000 * servers.count {
        return Err(invalid(
            line,
            "createCount",
            args[1],
            format!(
                "exceeds capacity of {} profile servers ({})",
                servers.count,
                20_000 * servers.count
            ),
        ));
    }

    Ok(CreateIdentities {
        name,
        create_count,
        identity_type,
        location,
        radius,
        profile_image_mask,
        profile_image_chance,
        thumbnail_mask,
        thumbnail_chance,
        servers,
    })
}

fn parse_activity(line: usize, args: &[&str]) -> Result<CreateActivities> {
    expect_args(line, "Activity", "14", args, 14)?;
    let name = args[0].to_string();
    let create_count = parse_u32(line, "createCount", args[1], 1, 50_000)?;
    let location = parse_location(line, args[2], args[3])?;
    let precision_min = parse_u32(line, "precMin", args[4], 0, 1000)?;
    let precision_max = parse_u32(line, "precMax", args[5], 0, 1000)?;
    if precision_min > precision_max {
        return Err(invalid(line, "precMin", args[4], "must be <= precMax"));
    }
    let radius = parse_u32(line, "radius", args[6], 0, 20_000_000)?;
    let start_from = parse_i32(line, "startFrom", args[7], -86_000, 86_000)?;
    let start_to = parse_i32(line, "startTo", args[8], -86_000, 86_000)?;
    if start_from > start_to {
        return Err(invalid(line, "startFrom", args[7], "must be <= startTo"));
    }
    let lifetime_from = parse_i32(line, "lifeFrom", args[9], 1, 86_400)?;
    let lifetime_to = parse_i32(line, "lifeTo", args[10], 1, 86_400)?;
    if lifetime_from > lifetime_to {
        return Err(invalid(line, "lifeFrom", args[9], "must be <= lifeTo"));
    }
    if start_from + lifetime_from <= 0 {
        return Err(invalid(
            line,
            "startFrom",
            args[7],
            "startFrom + lifeFrom must be > 0",
        ));
    }
    if start_to + lifetime_to > 86_400 {
        return Err(invalid(
            line,
            "startTo",
            args[8],
            "startTo + lifeTo must be <= 86400",
        ));
    }
    let owner_index = parse_u32(line, "index", args[12], 1, 99_999)?;
    let owner_count = parse_u32(line, "count", args[13], 1, 99_999)?;
    check_sum(line, "index + count", args[13], owner_index, owner_count, 100_000)?;

    Ok(CreateActivities {
        name,
        create_count,
        location,
        radius,
        precision_min,
        precision_max,
        start_from,
        start_to,
        lifetime_from,
        lifetime_to,
        owners: PositionalRange {
            group: args[11].to_string(),
            index: owner_index,
            count: owner_count,
        },
    })
}

fn parse_test_query(line: usize, args: &[&str]) -> Result<TestQuery> {
    expect_args(line, "TestQuery", "9", args, 9)?;
    let servers = parse_server_range(line, args[0], args[1], args[2])?;
    let name_filter = args[3].to_string();
    let type_filter = args[4].to_string();
    let include_images = parse_bool(line, "includeImages", args[5])?;
    let location = parse_optional_location(line, args[6], args[7])?;
    let radius = parse_u32(line, "radius", args[8], 0, 20_000_000)?;
    Ok(TestQuery {
        servers,
        name_filter,
        type_filter,
        include_images,
        location,
        radius,
    })
}

fn parse_test_query_activity(line: usize, args: &[&str]) -> Result<TestQueryActivity> {
    expect_args(line, "TestQueryActivity", "9", args, 9)?;
    let servers = parse_server_range(line, args[0], args[1], args[2])?;
    let type_filter = args[3].to_string();
    let start_not_after = parse_optional_i64(line, "startNotAfter", args[4])?;
    let expiration_not_before = parse_optional_i64(line, "expirationNotBefore", args[5])?;
    if let (Some(start), Some(expiration)) = (start_not_after, expiration_not_before) {
        if start >= expiration {
            return Err(invalid(
                line,
                "startNotAfter",
                args[4],
                "must be < expirationNotBefore",
            ));
        }
    }
    let location = parse_optional_location(line, args[6], args[7])?;
    let radius = parse_u32(line, "radius", args[8], 0, 20_000_000)?;
    Ok(TestQueryActivity {
        servers,
        type_filter,
        start_not_after,
        expiration_not_before,
        location,
        radius,
    })
}

fn expect_args(
    line: usize,
    keyword: &'static str,
    expected: &'static str,
    args: &[&str],
    count: usize,
) -> Result<()> {
    if args.len() != count {
        return Err(ParseError::ArgumentCount {
            line,
            keyword,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn invalid(
    line: usize,
    what: &'static str,
    token: &str,
    constraint: impl Into<String>,
) -> ParseError {
    ParseError::InvalidValue {
        line,
        what,
        token: token.to_string(),
        constraint: constraint.into(),
    }
}

fn parse_u32(line: usize, what: &'static str, token: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = token
        .parse()
        .map_err(|_| invalid(line, what, token, "not an unsigned integer"))?;
    if value < min || value > max {
        return Err(invalid(line, what, token, format!("out of range [{min}, {max}]")));
    }
    Ok(value)
}

fn parse_i32(line: usize, what: &'static str, token: &str, min: i32, max: i32) -> Result<i32> {
    let value: i32 = token
        .parse()
        .map_err(|_| invalid(line, what, token, "not an integer"))?;
    if value < min || value > max {
        return Err(invalid(line, what, token, format!("out of range [{min}, {max}]")));
    }
    Ok(value)
}

fn parse_f64(line: usize, what: &'static str, token: &str) -> Result<f64> {
    let value: f64 = token
        .parse()
        .map_err(|_| invalid(line, what, token, "not a decimal number"))?;
    if !value.is_finite() {
        return Err(invalid(line, what, token, "not finite"));
    }
    Ok(value)
}

fn parse_bool(line: usize, what: &'static str, token: &str) -> Result<bool> {
    match token {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(invalid(line, what, other, "expected 'true' or 'false'")),
    }
}

fn parse_location(line: usize, lat: &str, lon: &str) -> Result<GpsLocation> {
    let latitude = parse_f64(line, "latitude", lat)?;
    let longitude = parse_f64(line, "longitude", lon)?;
    GpsLocation::new(latitude, longitude)
        .map_err(|e| invalid(line, "location", lat, e.to_string()))
}

fn parse_optional_location(line: usize, lat: &str, lon: &str) -> Result<Option<GpsLocation>> {
    match (lat == NO_LOCATION, lon == NO_LOCATION) {
        (true, true) => Ok(None),
        (false, false) => Ok(Some(parse_location(line, lat, lon)?)),
        _ => Err(invalid(
            line,
            "location",
            lat,
            "latitude and longitude must both be NO_LOCATION or both be coordinates",
        )),
    }
}

fn parse_optional_i64(line: usize, what: &'static str, token: &str) -> Result<Option<i64>> {
    if token == ANY {
        return Ok(None);
    }
    let value: i64 = token
        .parse()
        .map_err(|_| invalid(line, what, token, "not an integer or ANY"))?;
    Ok(Some(value))
}

fn check_sum(
    line: usize,
    what: &'static str,
    token: &str,
    index: u32,
    count: u32,
    max: u32,
) -> Result<()> {
    if index + count > max {
        return Err(invalid(line, what, token, format!("must be <= {max}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_two_server_propagation_scenario() {
        let text = "\
# two-server propagation
ProfileServer A 2 10000 10.0 20.0 50000

Neighborhood A 1 2
StartServer A 1 2
Identity Ia 110 Test 10.0 20.0 50000 * 80 * 80 A 1 1
Delay 30
TestQuery A 1 2 I* * true 10.0 20.0 30000
";
        let commands = parse_scenario(text).unwrap();
        assert_eq!(commands.len(), 6);
        match &commands[0] {
            Command::ProfileServer(create) => {
                assert_eq!(create.group, "A");
                assert_eq!(create.count, 2);
                assert_eq!(create.base_port, 10000);
                assert_eq!(create.radius, 50000);
            }
            other => panic!("expected ProfileServer, got {other:?}"),
        }
        match &commands[5] {
            Command::TestQuery(query) => {
                assert_eq!(query.name_filter, "I*");
                assert!(query.include_images);
                assert!(query.location.is_some());
            }
            other => panic!("expected TestQuery, got {other:?}"),
        }
    }

    #[test]
    fn parses_activity_query_sentinels() {
        let text = "\
ProximityServer PX 2 20000 10.0 20.0 50000
TestQueryActivity PX 1 2 ** ANY ANY NO_LOCATION NO_LOCATION 0
";
        let commands = parse_scenario(text).unwrap();
        match &commands[1] {
            Command::TestQueryActivity(query) => {
                assert_eq!(query.start_not_after, None);
                assert_eq!(query.expiration_not_before, None);
                assert_eq!(query.location, None);
            }
            other => panic!("expected TestQueryActivity, got {other:?}"),
        }
    }

    #[test]
    fn errors_carry_line_numbers() {
        let text = "ProfileServer A 2 10000 10.0 20.0 50000\nDelay 0\n";
        match parse_scenario(text) {
            Err(ParseError::InvalidValue { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            parse_scenario("Profileserver A 2 10000 10.0 20.0 50000"),
            Err(ParseError::UnknownCommand { line: 1, .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_count() {
        assert!(parse_scenario("ProfileServer A 1000 10000 10.0 20.0 50000").is_err());
        assert!(parse_scenario("ProfileServer A 0 10000 10.0 20.0 50000").is_err());
    }

    #[test]
    fn rejects_base_port_beyond_block_space() {
        // 65535 - 20 * 2 = 65495 is the last valid base port for 2 servers.
        assert!(parse_scenario("ProfileServer A 2 65495 10.0 20.0 50000").is_ok());
        assert!(parse_scenario("ProfileServer A 2 65496 10.0 20.0 50000").is_err());
    }

    #[test]
    fn rejects_overlapping_port_blocks() {
        let text = "\
ProfileServer A 2 10000 10.0 20.0 50000
ProximityServer B 1 10039 10.0 20.0 50000
";
        match parse_scenario(text) {
            Err(ParseError::PortOverlap { line, group, other, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(group, "B");
                assert_eq!(other, "A");
            }
            other => panic!("expected PortOverlap, got {other:?}"),
        }

        let disjoint = "\
ProfileServer A 2 10000 10.0 20.0 50000
ProximityServer B 1 10040 10.0 20.0 50000
";
        assert!(parse_scenario(disjoint).is_ok());
    }

    #[test]
    fn rejects_duplicate_group_names() {
        let text = "\
ProfileServer A 1 10000 10.0 20.0 50000
ProximityServer A 1 20000 10.0 20.0 50000
";
        assert!(matches!(
            parse_scenario(text),
            Err(ParseError::DuplicateGroup { line: 2, .. })
        ));
    }

    #[test]
    fn rejects_misplaced_load_snapshot() {
        let ok = "LoadSnapshot s1\nDelay 5\n";
        assert!(parse_scenario(ok).is_ok());

        let bad = "Delay 5\nLoadSnapshot s1\n";
        assert!(matches!(
            parse_scenario(bad),
            Err(ParseError::LoadSnapshotNotFirst { line: 2 })
        ));
    }

    #[test]
    fn rejects_neighborhood_with_partial_triple() {
        assert!(matches!(
            parse_scenario("Neighborhood A 1"),
            Err(ParseError::ArgumentCount { .. })
        ));
        assert!(parse_scenario("Neighborhood A 1 2 B 1 3").is_ok());
    }

    #[test]
    fn rejects_identity_over_capacity() {
        // 1 server holds at most 20000 identities.
        let text = "Identity Ia 20001 Test 10.0 20.0 1000 * 50 * 50 A 1 1";
        assert!(parse_scenario(text).is_err());
        let ok = "Identity Ia 20000 Test 10.0 20.0 1000 * 50 * 50 A 1 1";
        assert!(parse_scenario(ok).is_ok());
    }

    #[test]
    fn rejects_activity_time_violations() {
        // startFrom + lifeFrom must be > 0.
        let bad = "Activity A 10 10.0 20.0 0 1000 50000 -3600 3600 3600 14400 I 1 1";
        assert!(parse_scenario(bad).is_err());
        // startTo + lifeTo must be <= 86400.
        let bad2 = "Activity A 10 10.0 20.0 0 1000 50000 -3600 80000 7200 14400 I 1 1";
        assert!(parse_scenario(bad2).is_err());
        let ok = "Activity A 10 10.0 20.0 0 1000 50000 -3600 3600 7200 14400 I 1 1";
        assert!(parse_scenario(ok).is_ok());
    }

    #[test]
    fn rejects_inverted_activity_query_times() {
        let bad = "TestQueryActivity PX 1 2 ** 100 100 NO_LOCATION NO_LOCATION 0";
        assert!(parse_scenario(bad).is_err());
        let ok = "TestQueryActivity PX 1 2 ** 100 200 NO_LOCATION NO_LOCATION 0";
        assert!(parse_scenario(ok).is_ok());
    }

    #[test]
    fn rejects_mixed_location_sentinel() {
        let bad = "TestQuery A 1 2 ** ** false NO_LOCATION 20.0 0";
        assert!(parse_scenario(bad).is_err());
    }

    #[test]
    fn multiple_spaces_between_tokens_are_tolerated() {
        let text = "Delay   12.5";
        let commands = parse_scenario(text).unwrap();
        assert_eq!(commands[0], Command::Delay { seconds: 12.5 });
    }
}

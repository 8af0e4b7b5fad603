//! End-to-end LOC protocol tests over real sockets, playing the child
//! process's role with a raw TCP client.

use geosim_loc::LocServer;
use geosim_types::{GpsLocation, NetworkId, ServerInner, ServerKind, SharedServer};
use geosim_wire::frame::{read_message, write_frame, write_message};
use geosim_wire::loc::{
    loc_message, loc_request, loc_response, neighbourhood_change::Change,
    GetNeighbourNodesRequest, LocMessage, LocStatus, RegisterServiceRequest, ServiceInfo,
    ServiceKind, PROTOCOL_VIOLATION_ID,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

fn make_server(name: &str, kind: ServerKind, base_port: u16) -> SharedServer {
    let location = GpsLocation::new(10.0, 20.0).unwrap();
    SharedServer::new(ServerInner::new(name, kind, location, base_port))
}

async fn connect(server: &SharedServer) -> TcpStream {
    let port = server.lock().loc_port();
    TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("LOC connect failed")
}

fn register_message(id: u64, kind: ServiceKind, port: u16, network_id: &[u8]) -> LocMessage {
    LocMessage::request(
        id,
        loc_request::Request::RegisterService(RegisterServiceRequest {
            service: Some(ServiceInfo {
                kind: kind as i32,
                port: u32::from(port),
                service_data: network_id.to_vec(),
            }),
        }),
    )
}

#[tokio::test]
async fn register_service_initializes_profile_server() {
    let owner = make_server("A001", ServerKind::Profile, 42000);
    let (_marker_tx, marker_rx) = watch::channel(false);
    let loc = LocServer::start(owner.clone(), marker_rx).await.unwrap();

    let mut stream = connect(&owner).await;
    let msg = register_message(1, ServiceKind::Profile, 42001, &[7u8; 32]);
    write_message(&mut stream, &msg).await.unwrap();

    let reply: LocMessage = read_message(&mut stream).await.unwrap();
    assert_eq!(reply.id, 1);
    match reply.kind {
        Some(loc_message::Kind::Response(resp)) => {
            assert_eq!(resp.status, LocStatus::Ok as i32);
            match resp.response {
                Some(loc_response::Response::RegisterService(reg)) => {
                    assert_eq!(reg.latitude, 10.0);
                    assert_eq!(reg.longitude, 20.0);
                }
                other => panic!("expected RegisterService response, got {other:?}"),
            }
        }
        other => panic!("expected response, got {other:?}"),
    }

    assert!(owner.lock().is_initialized());
    assert_eq!(owner.lock().network_id(), Some(NetworkId([7u8; 32])));

    loc.shutdown().await;
}

#[tokio::test]
async fn proximity_registration_waits_for_location_marker() {
    let owner = make_server("PX001", ServerKind::Proximity, 42100);
    let (marker_tx, marker_rx) = watch::channel(false);
    let loc = LocServer::start(owner.clone(), marker_rx).await.unwrap();

    let mut stream = connect(&owner).await;
    let msg = register_message(1, ServiceKind::Proximity, 42101, &[9u8; 32]);
    write_message(&mut stream, &msg).await.unwrap();
    let _reply: LocMessage = read_message(&mut stream).await.unwrap();

    // Registered but the marker has not fired: still uninitialized.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!owner.lock().is_initialized());

    marker_tx.send(true).unwrap();

    let mut initialized = false;
    for _ in 0..50 {
        if owner.lock().is_initialized() {
            initialized = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(initialized, "marker did not arm network-id assignment");

    loc.shutdown().await;
}

#[tokio::test]
async fn keep_alive_subscriber_receives_neighborhood_changes() {
    let owner = make_server("A001", ServerKind::Profile, 42200);
    let (_marker_tx, marker_rx) = watch::channel(false);
    let loc = LocServer::start(owner.clone(), marker_rx).await.unwrap();

    let mut stream = connect(&owner).await;
    write_message(
        &mut stream,
        &register_message(1, ServiceKind::Profile, 42201, &[1u8; 32]),
    )
    .await
    .unwrap();
    let _: LocMessage = read_message(&mut stream).await.unwrap();

    write_message(
        &mut stream,
        &LocMessage::request(
            2,
            loc_request::Request::GetNeighbourNodes(GetNeighbourNodesRequest {
                keep_alive: true,
            }),
        ),
    )
    .await
    .unwrap();
    let snapshot: LocMessage = read_message(&mut stream).await.unwrap();
    match snapshot.kind {
        Some(loc_message::Kind::Response(resp)) => match resp.response {
            Some(loc_response::Response::GetNeighbourNodes(nodes)) => {
                assert!(nodes.nodes.is_empty());
            }
            other => panic!("expected GetNeighbourNodes response, got {other:?}"),
        },
        other => panic!("expected response, got {other:?}"),
    }

    // An initialized peer joins the neighborhood.
    let peer = make_server("A002", ServerKind::Profile, 42220);
    peer.complete_initialization(NetworkId([2u8; 32]));
    loc.add_neighborhood(&[peer.clone()]).await;

    let pushed: LocMessage = timeout(Duration::from_secs(5), read_message(&mut stream))
        .await
        .expect("no notification arrived")
        .unwrap();
    match pushed.kind {
        Some(loc_message::Kind::Request(req)) => match req.request {
            Some(loc_request::Request::NeighbourhoodChanged(notification)) => {
                assert_eq!(notification.changes.len(), 1);
                match &notification.changes[0].change {
                    Some(Change::AddedNode(node)) => {
                        assert_eq!(node.services[0].service_data, vec![2u8; 32]);
                        assert_eq!(node.services[0].port, 42221);
                    }
                    other => panic!("expected AddedNode, got {other:?}"),
                }
            }
            other => panic!("expected NeighbourhoodChanged, got {other:?}"),
        },
        other => panic!("expected pushed request, got {other:?}"),
    }

    // Cancelling produces a removal notification with the network id.
    loc.cancel_neighborhood(&[peer]).await;
    let removed: LocMessage = timeout(Duration::from_secs(5), read_message(&mut stream))
        .await
        .expect("no removal notification")
        .unwrap();
    match removed.kind {
        Some(loc_message::Kind::Request(req)) => match req.request {
            Some(loc_request::Request::NeighbourhoodChanged(notification)) => {
                match &notification.changes[0].change {
                    Some(Change::RemovedNodeId(id)) => assert_eq!(id, &vec![2u8; 32]),
                    other => panic!("expected RemovedNodeId, got {other:?}"),
                }
            }
            other => panic!("expected NeighbourhoodChanged, got {other:?}"),
        },
        other => panic!("expected pushed request, got {other:?}"),
    }

    loc.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_gets_one_violation_response_then_close() {
    let owner = make_server("A001", ServerKind::Profile, 42300);
    owner.complete_initialization(NetworkId([5u8; 32]));
    let (_marker_tx, marker_rx) = watch::channel(false);
    let loc = LocServer::start(owner.clone(), marker_rx).await.unwrap();

    let mut stream = connect(&owner).await;
    // A frame whose body is not a valid LocMessage.
    write_frame(&mut stream, &[0xde, 0xad, 0xbe, 0xef, 0x01])
        .await
        .unwrap();

    let reply: LocMessage = read_message(&mut stream).await.unwrap();
    assert_eq!(reply.id, PROTOCOL_VIOLATION_ID);
    match reply.kind {
        Some(loc_message::Kind::Response(resp)) => {
            assert_eq!(resp.status, LocStatus::ErrorProtocolViolation as i32);
        }
        other => panic!("expected violation response, got {other:?}"),
    }

    // The connection is closed after the single violation response.
    match read_message::<LocMessage, _>(&mut stream).await {
        Err(geosim_wire::WireError::ConnectionClosed) => {}
        other => panic!("expected closed connection, got {other:?}"),
    }

    // The owner's registration state is unaffected.
    assert!(owner.lock().is_initialized());
    assert_eq!(owner.lock().network_id(), Some(NetworkId([5u8; 32])));

    loc.shutdown().await;
}

#[tokio::test]
async fn register_with_wrong_kind_is_a_violation() {
    let owner = make_server("A001", ServerKind::Profile, 42400);
    let (_marker_tx, marker_rx) = watch::channel(false);
    let loc = LocServer::start(owner.clone(), marker_rx).await.unwrap();

    let mut stream = connect(&owner).await;
    let msg = register_message(1, ServiceKind::Proximity, 42401, &[1u8; 32]);
    write_message(&mut stream, &msg).await.unwrap();

    let reply: LocMessage = read_message(&mut stream).await.unwrap();
    assert_eq!(reply.id, PROTOCOL_VIOLATION_ID);
    assert!(!owner.lock().is_initialized());

    loc.shutdown().await;
}

#[tokio::test]
async fn register_with_short_network_id_is_a_violation() {
    let owner = make_server("A001", ServerKind::Profile, 42500);
    let (_marker_tx, marker_rx) = watch::channel(false);
    let loc = LocServer::start(owner.clone(), marker_rx).await.unwrap();

    let mut stream = connect(&owner).await;
    let msg = register_message(1, ServiceKind::Profile, 42501, &[1u8; 16]);
    write_message(&mut stream, &msg).await.unwrap();

    let reply: LocMessage = read_message(&mut stream).await.unwrap();
    assert_eq!(reply.id, PROTOCOL_VIOLATION_ID);
    assert!(!owner.lock().is_initialized());

    loc.shutdown().await;
}

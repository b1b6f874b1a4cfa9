/// Integration tests for IPC communication
/// These tests verify that commands and responses serialize correctly
/// and survive the newline-delimited socket protocol
use common::{
    Command, OptimizerStatus, PlayerError, PlayerStatus, RenderMode, Response, ZoneId, ZoneStatus,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[test]
fn test_zone_commands_roundtrip() {
    let cmd = Command::Play {
        zone: Some(ZoneId::Vertical),
    };
    let json = serde_json::to_string(&cmd).unwrap();
    assert!(json.contains("\"vertical\""));

    match serde_json::from_str::<Command>(&json).unwrap() {
        Command::Play { zone } => assert_eq!(zone, Some(ZoneId::Vertical)),
        other => panic!("Wrong command type: {:?}", other),
    }

    let cmd = Command::Next { zone: None };
    let json = serde_json::to_string(&cmd).unwrap();
    match serde_json::from_str::<Command>(&json).unwrap() {
        Command::Next { zone } => assert!(zone.is_none()),
        other => panic!("Wrong command type: {:?}", other),
    }
}

#[test]
fn test_simple_commands() {
    let commands = vec![
        Command::Rescan,
        Command::Optimize,
        Command::CancelOptimize,
        Command::Status,
        Command::Ping,
        Command::Kill,
        Command::Stop { zone: None },
        Command::Previous {
            zone: Some(ZoneId::Background),
        },
    ];

    for cmd in commands {
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(!json.contains('\n'));
        let _deserialized: Command = serde_json::from_str(&json).unwrap();
    }
}

#[test]
fn test_unknown_zone_is_rejected() {
    let result = serde_json::from_str::<Command>(r#"{"Play":{"zone":"sidebar"}}"#);
    assert!(result.is_err());
}

#[test]
fn test_status_response() {
    let mut main = ZoneStatus::idle(ZoneId::Main);
    main.playing = true;
    main.playlist_len = 3;
    main.current_index = 2;
    main.current_path = Some("/var/lib/nctv-player/playlist/playlist-main/c.mp4".to_string());
    main.render_mode = RenderMode::Overlay;
    main.video_available = true;

    let resp = Response::Status(PlayerStatus {
        version: "0.1.0".to_string(),
        uptime_secs: 42,
        zones: vec![ZoneStatus::idle(ZoneId::Background), main],
        optimizer: OptimizerStatus {
            optimizing: true,
            status_message: "Optimizing (1/4): a.mp4".to_string(),
            total_files: 4,
            completed_files: 1,
        },
    });

    let json = serde_json::to_string(&resp).unwrap();
    match serde_json::from_str::<Response>(&json).unwrap() {
        Response::Status(status) => {
            assert_eq!(status.uptime_secs, 42);
            assert_eq!(status.zones.len(), 2);
            assert!(!status.zones[0].playing);
            assert_eq!(status.zones[1].render_mode, RenderMode::Overlay);
            assert_eq!(status.zones[1].current_index, 2);
            assert_eq!(status.optimizer.progress(), 0.25);
        }
        other => panic!("Wrong response type: {:?}", other),
    }
}

#[test]
fn test_error_response() {
    let resp = Response::Error(PlayerError::NotFound("Zone not running: main".to_string()));
    let json = serde_json::to_string(&resp).unwrap();
    match serde_json::from_str::<Response>(&json).unwrap() {
        Response::Error(e) => assert_eq!(e.to_string(), "Not found: Zone not running: main"),
        other => panic!("Wrong response type: {:?}", other),
    }
}

/// One request/response exchange over a real socket, framed the way
/// `nctvctl` and the player frame it
#[tokio::test]
async fn test_socket_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nctv-player.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await.unwrap() {
            let response = match serde_json::from_str::<Command>(&line) {
                Ok(Command::Ping) => Response::Pong,
                Ok(_) => Response::Ok,
                Err(e) => Response::Error(PlayerError::Ipc(e.to_string())),
            };
            let json = serde_json::to_string(&response).unwrap();
            writer.write_all(json.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        }
    });

    let stream = UnixStream::connect(&path).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    for (request, expect_pong) in [
        (serde_json::to_string(&Command::Ping).unwrap(), true),
        (serde_json::to_string(&Command::Rescan).unwrap(), false),
    ] {
        writer.write_all(request.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        if expect_pong {
            assert!(matches!(response, Response::Pong));
        } else {
            assert!(matches!(response, Response::Ok));
        }
    }

    writer.write_all(b"not json\n").await.unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    assert!(matches!(
        serde_json::from_str::<Response>(&line).unwrap(),
        Response::Error(PlayerError::Ipc(_))
    ));

    drop(writer);
    drop(lines);
    server.await.unwrap();
}

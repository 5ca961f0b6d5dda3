//! Record round trip: an agent is switched into record mode, then posts
//! RECORD messages back to the listener over HTTP.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use monkeytalk::agent::MtAgent;
use monkeytalk::parse_line;
use monkeytalk::protocol::{
    CommandSender, HttpCommandSender, JsonHandler, JsonRequest, JsonServer, MtCommand, Response,
};
use monkeytalk::recorder::{RecordListener, RecordSession};
use monkeytalk::Command;

/// Agent endpoint remembering the `record` flag of each PING
#[derive(Default)]
struct RecordingAgent {
    pings: Mutex<Vec<String>>,
}

#[async_trait]
impl JsonHandler for RecordingAgent {
    async fn serve(&self, request: JsonRequest) -> Response {
        if MtCommand::of(&request.json) == Some(MtCommand::Ping) {
            let record = request.json["record"].as_str().unwrap_or_default().to_string();
            self.pings.lock().unwrap().push(record);
        }
        Response::ok(None::<String>)
    }
}

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

impl RecordListener for Collect {
    fn on_record(&self, command: &Command) {
        self.0.lock().unwrap().push(command.to_string());
    }
}

#[tokio::test]
async fn test_record_round_trip() {
    let device = Arc::new(RecordingAgent::default());
    let mut agent_server = JsonServer::bind("127.0.0.1:0".parse().unwrap(), device.clone())
        .await
        .unwrap();
    let agent = Arc::new(MtAgent::new("Generic", "127.0.0.1", Some(agent_server.port())));

    let session = Arc::new(RecordSession::default());
    let collected = Arc::new(Collect::default());
    session.set_listener(collected.clone()).await;
    let mut record_server = JsonServer::bind("127.0.0.1:0".parse().unwrap(), session.clone())
        .await
        .unwrap();
    let record_port = record_server.port();

    // Posted before recording starts: acknowledged, never queued
    let device_side = HttpCommandSender::new("127.0.0.1", record_port).unwrap();
    let early = device_side.record(&parse_line("Button early Tap")).await.unwrap();
    assert!(early.is_ok());

    session
        .start_recording(agent, "127.0.0.1", record_port)
        .await
        .unwrap();
    assert!(session.is_recording());

    for line in ["Input name EnterText \"Bo Bo\"", "Button login Tap"] {
        let resp = device_side.record(&parse_line(line)).await.unwrap();
        assert!(resp.is_ok());
    }

    let first = session.queue().poll(Duration::from_secs(2)).await.unwrap();
    assert_eq!(first.to_string(), "Input name EnterText \"Bo Bo\"");
    assert_eq!(first.args(), &["Bo Bo".to_string()]);
    let second = session.queue().poll(Duration::from_secs(2)).await.unwrap();
    assert_eq!(second.to_string(), "Button login Tap");
    assert!(session.queue().poll(Duration::from_millis(50)).await.is_none());
    assert_eq!(collected.0.lock().unwrap().len(), 2);

    session.stop_recording().await.unwrap();
    assert_eq!(*device.pings.lock().unwrap(), vec!["ON", "OFF"]);

    record_server.stop().await;
    agent_server.stop().await;
}

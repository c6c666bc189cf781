//! Quiz control messages over the control channel

mod harness;

use harness::Fixture;
use quizlink_client::session::SessionEvent;
use quizlink_client::{ConsumerEvent, HandStatus, QuizStage};
use serde_json::json;

#[tokio::test]
async fn test_quiz_start_waits_for_open_channel() {
    let mut fixture = Fixture::new();
    let session = fixture.logged_in().await;

    assert!(!fixture.client.start_quiz().await);
    assert!(session.control().sent().is_empty());
    assert_eq!(fixture.client.control().messages_dropped(), 1);
    assert_eq!(fixture.client.stage(), QuizStage::Instructions);

    session.open_control();
    fixture.settle().await;
    assert!(fixture
        .drain_events()
        .iter()
        .any(|event| matches!(event, ConsumerEvent::ControlChannelReady)));

    assert!(fixture.client.start_quiz().await);
    assert!(fixture.client.start_quiz().await);
    assert_eq!(session.control().sent(), vec!["quiz_start", "quiz_start"]);
    assert_eq!(fixture.client.control().messages_sent(), 2);
    assert_eq!(fixture.client.stage(), QuizStage::InProgress);
}

#[tokio::test]
async fn test_hand_status_updates_info_bar() {
    let mut fixture = Fixture::new();
    let session = fixture.logged_in().await;
    session.open_control();
    fixture.settle().await;
    fixture.drain_events();

    session.receive_control(&json!({"message": "hand_seen"}).to_string());
    session.receive_control(&json!({"message": "hand_unseen"}).to_string());
    fixture.settle().await;

    let statuses: Vec<HandStatus> = fixture
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            ConsumerEvent::InfoBar(status) => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![HandStatus::seen(), HandStatus::unseen()]);
}

#[tokio::test]
async fn test_new_question_without_image() {
    let mut fixture = Fixture::new();
    let session = fixture.logged_in().await;
    session.open_control();
    fixture.settle().await;
    fixture.drain_events();

    session.receive_control(
        &json!({
            "message": "new_question",
            "qNo": "Q3",
            "question": "Which planet is largest?",
            "choice1": "Mars",
            "choice2": "Jupiter",
            "choice3": "Venus",
            "choice4": "Mercury"
        })
        .to_string(),
    );
    fixture.settle().await;

    let question = fixture
        .drain_events()
        .into_iter()
        .find_map(|event| match event {
            ConsumerEvent::Question(question) => Some(question),
            _ => None,
        })
        .expect("question event");
    assert_eq!(question.label.as_deref(), Some("Q3"));
    assert_eq!(question.text, "Which planet is largest?");
    let choices: Vec<_> = question.choices().collect();
    assert_eq!(
        choices,
        vec![(1, "Mars"), (2, "Jupiter"), (3, "Venus"), (4, "Mercury")]
    );
    assert!(question.image.is_none());
}

#[tokio::test]
async fn test_quiz_finished_reports_rounded_hands_down_time() {
    let mut fixture = Fixture::new();
    let session = fixture.logged_in().await;
    session.open_control();
    fixture.settle().await;
    assert!(fixture.client.start_quiz().await);
    fixture.drain_events();

    session.receive_control(
        &json!({"message": "quiz_finished", "score": 80.0, "hands_unseen": 12.345}).to_string(),
    );
    fixture.settle().await;

    let events = fixture.drain_events();
    let result = events
        .iter()
        .find_map(|event| match event {
            ConsumerEvent::Finished(result) => Some(*result),
            _ => None,
        })
        .expect("finished event");
    assert_eq!(result.score, 80.0);
    assert_eq!(result.hands_down.to_string(), "12.35");
    assert!(events
        .iter()
        .any(|event| matches!(event, ConsumerEvent::StageChanged(QuizStage::Complete))));
    assert_eq!(fixture.client.stage(), QuizStage::Complete);
}

#[tokio::test]
async fn test_malformed_and_unknown_messages_are_dropped() {
    let mut fixture = Fixture::new();
    let session = fixture.logged_in().await;
    session.open_control();
    fixture.settle().await;
    fixture.drain_events();

    session.receive_control("{not json");
    session.receive_control(&json!({"message": "leaderboard"}).to_string());
    session.receive_control(&json!({"message": "quiz_finished", "score": 140, "hands_unseen": 1}).to_string());
    session.receive_control(&json!({"message": "hand_seen"}).to_string());
    fixture.settle().await;

    let events = fixture.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ConsumerEvent::InfoBar(status) if status.seen));
}

#[tokio::test]
async fn test_messages_from_torn_down_session_are_ignored() {
    let mut fixture = Fixture::new();
    let session = fixture.logged_in().await;
    session.open_control();
    fixture.settle().await;

    fixture.client.teardown_session().await;
    assert!(fixture
        .drain_events()
        .iter()
        .any(|event| matches!(event, ConsumerEvent::ControlChannelClosed)));
    assert!(!fixture.client.control().is_open());

    session.receive_control(&json!({"message": "hand_seen"}).to_string());
    fixture.settle().await;

    assert!(fixture.drain_events().is_empty());
    assert!(!fixture.client.start_quiz().await);
}

#[tokio::test]
async fn test_remote_message_channel_delivers_but_is_not_control() {
    let mut fixture = Fixture::new();
    fixture.logged_in().await;
    fixture.drain_events();

    let id = fixture.client.negotiator().session_id().expect("current session");
    let events = fixture.client.event_sender();
    events
        .send(SessionEvent::ControlChannelOpen {
            session: id,
            label: "message".to_string(),
        })
        .unwrap();
    events
        .send(SessionEvent::ControlText {
            session: id,
            label: "message".to_string(),
            text: json!({"message": "hand_seen"}).to_string(),
        })
        .unwrap();
    events
        .send(SessionEvent::ControlText {
            session: id,
            label: "message".to_string(),
            text: json!({"message": "new_question", "question": "Q", "choice2": "B"}).to_string(),
        })
        .unwrap();
    fixture.settle().await;

    let events = fixture.drain_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, ConsumerEvent::InfoBar(status) if status.seen)));
    assert!(events.iter().any(
        |event| matches!(event, ConsumerEvent::Question(question) if question.choice(2) == Some("B"))
    ));
    assert!(!events
        .iter()
        .any(|event| matches!(event, ConsumerEvent::ControlChannelReady)));

    // Outgoing messages still wait for the local "signal" channel
    assert!(!fixture.client.start_quiz().await);
}


use std::sync::{Arc, Mutex};
use std::time::Duration;

use paneauth_core::account::AccountContext;
use paneauth_core::config::AuthConfig;
use paneauth_core::error::{AuthFailureKind, FlowError};
use paneauth_core::host::HostIntegration;
use paneauth_core::logging::{self, IdentityLogLevel, IdentityLogger};
use paneauth_core::orchestrator::{FallbackOrchestrator, FlowState};
use paneauth_core::request::TokenRequestBuilder;
use paneauth_core::sim::{DialogScript, Scenario, ScenarioAccount, Simulation, Step};

use scenarios::{ALICE, alice_account, fail, hint_only, token};

fn sim(scenario: Scenario) -> Simulation {
    Simulation::new(scenario, AuthConfig::default())
}

/// Test: a matched account is tried silently first and nothing else runs on success.
#[tokio::test]
async fn test_silent_success_short_circuits() {
    let sim = sim(Scenario {
        host_context: Some(hint_only()),
        accounts: vec![alice_account()],
        silent: token("silent-token"),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert_eq!(report.display_text(), "silent-token");
    assert_eq!(
        report.trace,
        vec![
            FlowState::Idle,
            FlowState::ResolvingContext,
            FlowState::AttemptingSilent,
            FlowState::Succeeded
        ]
    );
    assert_eq!(sim.log.count("sso_silent"), 0);
    assert_eq!(sim.log.count("acquire_token_popup"), 0);
    assert!(!report.show_sign_out);
}

/// Test: silent failure without a login hint skips SSO and goes to the popup.
#[tokio::test]
async fn test_silent_failure_without_hint_skips_sso() {
    let sim = sim(Scenario {
        host_context: Some(AccountContext {
            local_account_id: Some("oid-alice".to_string()),
            ..AccountContext::default()
        }),
        accounts: vec![alice_account()],
        silent: fail("interaction_required"),
        popup: token("popup-token"),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert!(report.visited(FlowState::AttemptingSilent));
    assert!(!report.visited(FlowState::AttemptingSso));
    assert!(report.visited(FlowState::AttemptingInteractivePopup));
    assert_eq!(report.terminal_state(), FlowState::Succeeded);
    assert_eq!(sim.log.count("sso_silent"), 0);
    assert_eq!(sim.log.count("acquire_token_silent"), 1);
}

/// Test: a hint with no cached account goes straight to SSO-silent.
#[tokio::test]
async fn test_hint_without_cached_account_uses_sso() {
    let sim = sim(Scenario {
        host_context: Some(hint_only()),
        sso: token("sso-token"),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert_eq!(report.display_text(), "sso-token");
    assert!(!report.visited(FlowState::AttemptingSilent));
    assert!(report.visited(FlowState::AttemptingSso));
    assert!(!report.visited(FlowState::AttemptingInteractivePopup));
    assert_eq!(sim.log.count("acquire_token_silent"), 0);
    assert_eq!(sim.log.count(&format!("set_active_account:{ALICE}")), 1);
    assert!(!report.show_sign_out);
}

/// Test: popup success marks the account active before success is reported.
#[tokio::test]
async fn test_popup_success_sets_active_account() {
    let sim = sim(Scenario {
        popup: Step::Token {
            token: "popup-token".to_string(),
            username: Some("bob@contoso.com".to_string()),
        },
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    let result = report.result.as_ref().unwrap();
    assert_eq!(result.access_token, "popup-token");
    assert_eq!(
        orchestrator.gateway().active_account().await.unwrap(),
        result.account.clone()
    );
    let calls = sim.log.calls();
    let popup_at = calls
        .iter()
        .position(|c| c.starts_with("acquire_token_popup:"))
        .unwrap();
    let active_at = calls
        .iter()
        .position(|c| c == "set_active_account:bob@contoso.com")
        .unwrap();
    assert!(popup_at < active_at);
    assert!(report.show_sign_out);
}

/// Test: a non-blocked popup failure is fatal and never opens a dialog.
#[tokio::test]
async fn test_popup_failure_is_fatal() {
    let sim = sim(scenarios::bare());
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert_eq!(report.terminal_state(), FlowState::Failed);
    assert!(!report.visited(FlowState::AttemptingDialogRelay));
    let err = report.result.as_ref().unwrap_err();
    assert!(matches!(err, FlowError::InteractivePopup(_)));
    assert_eq!(err.kind(), Some(AuthFailureKind::UserCancelled));
    assert!(report.display_text().starts_with("InteractivePopupFailure"));
    assert_eq!(sim.log.count("display_dialog"), 0);
}

/// Test: unknown error codes are not treated as a blocked popup.
#[tokio::test]
async fn test_unrecognized_popup_error_does_not_relay() {
    let sim = sim(Scenario {
        popup: fail("something_new"),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert_eq!(
        report.result.unwrap_err().kind(),
        Some(AuthFailureKind::Unknown)
    );
    assert_eq!(sim.log.count("display_dialog"), 0);
}

/// Test: blocked popup opens exactly one dialog and closes it once on message.
#[tokio::test]
async fn test_blocked_popup_relays_token_through_dialog() {
    let sim = sim(scenarios::blocked_with_message(r#"{"token":"abc"}"#));
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert!(report.visited(FlowState::AttemptingDialogRelay));
    assert_eq!(report.terminal_state(), FlowState::Succeeded);
    assert_eq!(report.display_text(), "abc");
    assert_eq!(sim.log.count("display_dialog"), 1);
    assert_eq!(sim.log.count("dialog.close"), 1);
    assert!(report.show_sign_out);
}

/// Test: the dialog URL carries the resolved context.
#[tokio::test]
async fn test_dialog_url_carries_account_context() {
    let sim = sim(Scenario {
        host_context: Some(hint_only()),
        ..scenarios::blocked_with_message(r#"{"token":"abc"}"#)
    });
    let orchestrator = sim.orchestrator().unwrap();

    orchestrator.authenticate().await;

    let opened = sim
        .log
        .calls()
        .into_iter()
        .find(|c| c.starts_with("display_dialog:"))
        .unwrap();
    let url = url::Url::parse(opened.trim_start_matches("display_dialog:")).unwrap();
    let (key, value) = url.query_pairs().next().unwrap();
    assert_eq!(key, "accountContext");
    assert_eq!(value, r#"{"loginHint":"alice@contoso.com"}"#);
}

/// Test: the full relay page runs a redirect round trip and the opener
/// recovers the account from the shared cache.
#[tokio::test]
async fn test_dialog_relay_round_trip() {
    let sim = sim(Scenario {
        host_context: Some(hint_only()),
        popup: fail("popup_blocked"),
        redirect: token("relayed"),
        dialog: DialogScript::Relay,
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    let result = report.result.unwrap();
    assert_eq!(result.access_token, "relayed");
    assert_eq!(result.account.map(|a| a.username), Some(ALICE.to_string()));
    assert_eq!(sim.log.count("login_redirect"), 1);
    assert_eq!(sim.log.count(r#"message_parent:{"token":"relayed"}"#), 1);
    assert_eq!(sim.log.count("dialog.close"), 1);
    assert_eq!(
        orchestrator
            .gateway()
            .active_account()
            .await
            .unwrap()
            .map(|a| a.username),
        Some(ALICE.to_string())
    );
}

/// Test: an error relayed by the dialog surfaces with its kind name.
#[tokio::test]
async fn test_dialog_relayed_error() {
    let sim = sim(Scenario {
        popup: fail("popup_window_error"),
        redirect: fail("access_denied"),
        dialog: DialogScript::Relay,
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert_eq!(
        report.result.unwrap_err(),
        FlowError::DialogRelay {
            error: "UserCancelled".to_string()
        }
    );
}

#[tokio::test]
async fn test_dialog_closed_by_user_is_cancelled() {
    let sim = sim(Scenario {
        popup: fail("popup_window_error"),
        dialog: DialogScript::Closed,
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert_eq!(report.result.unwrap_err(), FlowError::DialogCancelled);
    assert_eq!(sim.log.count("dialog.close"), 0);
}

#[tokio::test]
async fn test_dialog_unavailable() {
    let sim = sim(Scenario {
        popup: fail("popup_window_error"),
        dialog: DialogScript::Unavailable,
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert!(matches!(
        report.result.unwrap_err(),
        FlowError::DialogUnavailable(_)
    ));
}

#[tokio::test]
async fn test_malformed_dialog_message_is_unknown_failure() {
    let sim = sim(scenarios::blocked_with_message(r#"{"token":"a","error":"b"}"#));
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert!(matches!(report.result.unwrap_err(), FlowError::Unknown(_)));
    assert_eq!(sim.log.count("dialog.close"), 1);
}

/// Test: a second dialog while one is open fails fast.
#[tokio::test]
async fn test_second_dialog_is_busy() {
    let sim = Simulation::with_init_delay(
        Scenario {
            redirect: token("first"),
            dialog: DialogScript::Relay,
            ..scenarios::bare()
        },
        AuthConfig::default(),
        Duration::from_millis(20),
    );
    let orchestrator = sim.orchestrator().unwrap();

    let (first, second) = tokio::join!(
        orchestrator.authenticate_with_dialog(),
        orchestrator.authenticate_with_dialog()
    );

    assert_eq!(first.display_text(), "first");
    assert_eq!(second.result.unwrap_err(), FlowError::DialogBusy);
    assert_eq!(sim.log.count("display_dialog"), 1);
}

/// Test: a dialog attempt abandoned mid-wait closes its dialog, frees the
/// slot and leaves the orchestrator idle, so the next attempt can run.
#[tokio::test]
async fn test_abandoned_dialog_attempt_releases_dialog() {
    let sim = Simulation::with_init_delay(
        Scenario {
            redirect: token("relayed"),
            dialog: DialogScript::Relay,
            ..scenarios::bare()
        },
        AuthConfig::default(),
        Duration::from_millis(200),
    );
    let orchestrator = sim.orchestrator().unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.authenticate_with_dialog(),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(orchestrator.state(), FlowState::Idle);
    assert_eq!(sim.log.count("dialog.close"), 1);

    // Let the first dialog page finish talking to nobody.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = orchestrator.authenticate_with_dialog().await;
    assert_eq!(second.result.unwrap().access_token, "relayed");
    assert_eq!(sim.log.count("display_dialog"), 2);
    assert_eq!(sim.log.count("dialog.close"), 2);
    assert_eq!(orchestrator.state(), FlowState::Idle);
}

/// Test: a relayed token whose account cannot be pinned down (no context,
/// several cached accounts) succeeds without touching the active account.
#[tokio::test]
async fn test_relayed_token_without_recoverable_account_is_not_activated() {
    let sim = sim(Scenario {
        accounts: vec![
            alice_account(),
            ScenarioAccount {
                username: "bob@contoso.com".to_string(),
                ..ScenarioAccount::default()
            },
        ],
        ..scenarios::blocked_with_message(r#"{"token":"abc"}"#)
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    let result = report.result.unwrap();
    assert_eq!(result.access_token, "abc");
    assert_eq!(result.account, None);
    assert_eq!(sim.log.count("set_active_account"), 0);
    assert_eq!(orchestrator.gateway().active_account().await.unwrap(), None);
}

/// Test: the popup returns to the configured redirect page and sign-out to
/// the configured post-logout page.
#[tokio::test]
async fn test_configured_pages_reach_the_identity_client() {
    let config = AuthConfig {
        redirect_page: "popup.html".to_string(),
        post_logout_redirect_page: "signed-out.html".to_string(),
        ..AuthConfig::default()
    };
    let sim = Simulation::new(
        Scenario {
            popup: token("t"),
            ..scenarios::bare()
        },
        config,
    );
    let taskpane = sim.taskpane().unwrap();

    taskpane.sign_in().await;
    taskpane.sign_out().await;

    assert_eq!(
        sim.log
            .count("acquire_token_popup:https://localhost:3000/popup.html"),
        1
    );
    assert_eq!(
        sim.log
            .count("logout_popup:https://localhost:3000/signed-out.html"),
        1
    );
}

/// One identity log line and whether it reached tracing.
#[derive(Debug, Clone)]
struct LoggedLine {
    message: String,
    contains_pii: bool,
    forwarded: bool,
}

/// Test: identity-client log lines go through the forwarder during a flow;
/// lines naming the user are dropped, the rest are forwarded.
#[tokio::test]
async fn test_identity_log_lines_are_forwarded_without_pii() {
    let sim = sim(Scenario {
        popup: token("logged"),
        ..scenarios::bare()
    });
    let lines: Arc<Mutex<Vec<LoggedLine>>> = Arc::default();
    let sink = Arc::clone(&lines);
    let logger: IdentityLogger = Arc::new(
        move |level: IdentityLogLevel, message: &str, contains_pii: bool| {
            let forwarded = logging::forward_identity_log(level, message, contains_pii);
            sink.lock().unwrap().push(LoggedLine {
                message: message.to_string(),
                contains_pii,
                forwarded,
            });
        },
    );
    let orchestrator = FallbackOrchestrator::new(
        Arc::clone(&sim.host) as Arc<dyn HostIntegration>,
        Arc::new(sim.gateway().with_logger(logger)),
        TokenRequestBuilder::default(),
        AuthConfig::default().dialog_url().unwrap(),
    );

    let report = orchestrator.authenticate().await;
    assert_eq!(report.display_text(), "logged");

    let lines = lines.lock().unwrap().clone();
    let pii = lines
        .iter()
        .find(|l| l.message.contains("token issued for"))
        .unwrap();
    assert!(pii.contains_pii);
    assert!(!pii.forwarded);
    let plain = lines
        .iter()
        .find(|l| l.message == "acquire_token_popup: token acquired")
        .unwrap();
    assert!(!plain.contains_pii);
    assert!(plain.forwarded);
    assert!(lines.iter().filter(|l| !l.contains_pii).all(|l| l.forwarded));
}

/// Test: hosts with nested app authentication never show sign-out.
#[tokio::test]
async fn test_nested_app_auth_hides_sign_out() {
    let sim = sim(Scenario {
        nested_app_auth: true,
        popup: token("naa-token"),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert!(report.visited(FlowState::AttemptingInteractivePopup));
    assert!(!report.show_sign_out);
    assert_eq!(sim.log.count("create:Nestable"), 1);
}

/// Test: host identity hints are requested once per session.
#[tokio::test]
async fn test_context_resolved_once() {
    let sim = sim(Scenario {
        host_context: Some(hint_only()),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    orchestrator.authenticate().await;
    orchestrator.authenticate().await;

    assert_eq!(sim.log.count("auth_context"), 1);
    assert_eq!(orchestrator.resolver().resolved(), Some(&hint_only()));
}

/// Test: a host without identity hints yields an empty context and a prompt.
#[tokio::test]
async fn test_host_context_failure_degrades_to_prompt() {
    let sim = sim(Scenario {
        popup: token("prompted"),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();

    let report = orchestrator.authenticate().await;

    assert_eq!(report.display_text(), "prompted");
    assert_eq!(orchestrator.resolver().resolved(), Some(&AccountContext::default()));
    assert!(!report.visited(FlowState::AttemptingSilent));
    assert!(!report.visited(FlowState::AttemptingSso));
}

/// Test: state observers see the run and the orchestrator returns to idle.
#[tokio::test]
async fn test_state_returns_to_idle() {
    let sim = sim(Scenario {
        popup: token("t"),
        ..scenarios::bare()
    });
    let orchestrator = sim.orchestrator().unwrap();
    let mut rx = orchestrator.subscribe();

    orchestrator.authenticate().await;

    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), FlowState::Idle);
    assert_eq!(orchestrator.state(), FlowState::Idle);
}

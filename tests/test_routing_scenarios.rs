//! End-to-end routing behavior through the router core
//!
//! Handlers are scripted mocks; the rule table is the built-in registry.


use specialist_router::error::ErrorCode;
use specialist_router::handler::{HandlerId, HandlerResult, HandlerSet};
use specialist_router::routing::{
    ConflictResolver, DecisionReason, Outcome, PrecedenceMatrix, RouterCore, RouterSettings,
    RoutingRule, RuleTable, Tier, TrailEntry, TriggerMatch, TriggerSet,
};
use specialist_router::testing::{ActivityTracker, MockHandler};
use specialist_router::workflow::{HandoffKind, Stage, WorkflowState};
use std::sync::Arc;
use test_helpers::*;

fn stage_changes(trail: &[TrailEntry]) -> Vec<(Stage, Stage)> {
    trail
        .iter()
        .filter_map(|entry| match entry {
            TrailEntry::StageChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_save_settings_routes_to_config_specialist() {
    let core = core_with(vec![]);
    let state = WorkflowState::new();

    let decision = core
        .classifier()
        .classify_text("How do I save player settings?", &state)
        .unwrap();

    assert_eq!(decision.selected_handler, Some(HandlerId::Config));
    assert_eq!(decision.reason, DecisionReason::RuleMatch);
    assert_eq!(decision.tier, Some(Tier::DomainSpecific));
    // persistence also matched "save" and lost on precedence
    assert!(decision.candidates.contains(&HandlerId::Persistence));
}

#[tokio::test]
async fn test_implement_phrase_beats_domain_threshold() {
    let core = core_with(vec![]);
    let mut state = WorkflowState::new();
    route_text(&core, &mut state, "where should the button go?").await;
    route_text(&core, &mut state, "what endpoint do I call?").await;
    assert_eq!(state.domains_touched().len(), 2);

    let response = route_text(&core, &mut state, "Now let's implement this").await;

    assert_eq!(response.handled_by, Some(HandlerId::Compressor));
    match &response.decision_trail[0] {
        TrailEntry::Classified { tier, trigger, .. } => {
            assert_eq!(*tier, Some(Tier::WorkflowTransition));
            assert!(matches!(trigger, Some(TriggerMatch::Phrase { .. })));
        }
        other => panic!("expected classification first, got {other:?}"),
    }
    assert_eq!(state.stage(), Stage::Implementation);
}

#[tokio::test]
async fn test_unknown_handoff_target_aborts_with_name_in_diagnostic() {
    let core = core_with(vec![Arc::new(MockHandler::directing(
        HandlerId::Ui,
        "route to physics: needs a rigid body pass",
    ))]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert_eq!(response.outcome, Outcome::Aborted);
    let diagnostic = response.error.as_ref().expect("diagnostic");
    assert_eq!(diagnostic.code, ErrorCode::InvalidHandoffTarget);
    assert!(diagnostic.message.contains("physics"));
    assert_eq!(response.invoked(), vec![HandlerId::Ui]);
    assert!(state.handoff_chain().is_empty());
    assert!(state.active_handler().is_none());
}

#[tokio::test]
async fn test_three_handler_cycle_is_rejected_on_repeat() {
    let core = core_with(vec![
        Arc::new(MockHandler::directing(HandlerId::Ui, "route to api")),
        Arc::new(MockHandler::directing(HandlerId::Api, "route to config")),
        Arc::new(MockHandler::directing(HandlerId::Config, "route to ui")),
    ]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert_eq!(response.outcome, Outcome::Aborted);
    let diagnostic = response.error.as_ref().expect("diagnostic");
    assert_eq!(diagnostic.code, ErrorCode::CyclicHandoff);
    assert!(diagnostic.message.contains("ui -> api -> config -> ui"));
    assert_eq!(
        response.invoked(),
        vec![HandlerId::Ui, HandlerId::Api, HandlerId::Config]
    );
    assert_eq!(response.hops, 2);
    // last good output is kept, with the abort noted
    assert!(response.content.starts_with("config output"));
    assert!(response.content.contains("[routing aborted:"));
}

#[tokio::test]
async fn test_self_handoff_counts_as_cycle() {
    let core = core_with(vec![Arc::new(MockHandler::directing(
        HandlerId::Network,
        "route to network",
    ))]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "set up a socket server").await;

    assert_eq!(
        response.error.map(|d| d.code),
        Some(ErrorCode::CyclicHandoff)
    );
    assert_eq!(response.hops, 0);
}

#[tokio::test]
async fn test_research_gap_round_trip_counts_two_hops() {
    let implementer = MockHandler::new(HandlerId::Implementer).then(HandlerResult::with_directive(
        "partial save code",
        "missing research api: need the cloud save endpoint signature",
    ));
    let api = Arc::new(MockHandler::replying(HandlerId::Api, "POST /saves(slot, blob)"));
    let core = core_with(vec![Arc::new(implementer), api.clone()]);
    let mut state = implementation_state(&core).await;
    assert_eq!(state.stage(), Stage::Implementation);

    let response = route_text(&core, &mut state, "write the code").await;

    assert!(response.is_handled());
    assert_eq!(response.hops, 2);
    assert_eq!(
        response.invoked(),
        vec![HandlerId::Implementer, HandlerId::Api, HandlerId::Compressor]
    );
    assert_eq!(
        stage_changes(&response.decision_trail),
        vec![
            (Stage::Implementation, Stage::Research),
            (Stage::Research, Stage::Compression),
            (Stage::Compression, Stage::Implementation),
        ]
    );

    let kinds: Vec<HandoffKind> = state.handoff_chain().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![HandoffKind::ResearchGap, HandoffKind::GapResolved]);
    assert!(state.domains_touched().contains(&HandlerId::Api));
    assert_eq!(state.stage(), Stage::Implementation);

    // the gap specialist saw the research stage
    let calls = api.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].snapshot.stage, Stage::Research);
}

#[tokio::test]
async fn test_gap_report_outside_implementation_is_final_output() {
    let core = core_with(vec![Arc::new(MockHandler::directing(
        HandlerId::Ui,
        "missing research api: signature",
    ))]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert!(response.is_handled());
    assert_eq!(response.hops, 0);
    assert_eq!(state.stage(), Stage::Research);
}

#[tokio::test]
async fn test_gap_naming_workflow_handler_is_invalid_target() {
    let implementer = MockHandler::new(HandlerId::Implementer).then(HandlerResult::with_directive(
        "partial",
        "missing research compressor: everything",
    ));
    let core = core_with(vec![Arc::new(implementer)]);
    let mut state = implementation_state(&core).await;

    let response = route_text(&core, &mut state, "write the code").await;

    assert_eq!(
        response.error.map(|d| d.code),
        Some(ErrorCode::InvalidHandoffTarget)
    );
    assert_eq!(state.stage(), Stage::Implementation);
}

#[tokio::test]
async fn test_same_tier_conflict_is_stable() {
    let core = core_with(vec![]);
    let state = WorkflowState::new();
    let text = "the menu should list every multiplayer server";

    let first = core.classifier().classify_text(text, &state).unwrap();
    for _ in 0..20 {
        let again = core.classifier().classify_text(text, &state).unwrap();
        assert_eq!(again, first);
    }

    assert_eq!(first.selected_handler, Some(HandlerId::Ui));
    assert_eq!(first.candidates, vec![HandlerId::Ui, HandlerId::Network]);
}

#[tokio::test]
async fn test_architecture_with_client_server_goes_to_domain_tier() {
    let core = core_with(vec![]);
    let decision = core
        .classifier()
        .classify_text(
            "what architecture should the client and server use?",
            &WorkflowState::new(),
        )
        .unwrap();

    assert_eq!(decision.selected_handler, Some(HandlerId::Network));
    assert_eq!(decision.tier, Some(Tier::DomainSpecific));
}

#[tokio::test]
async fn test_third_domain_triggers_compression_on_next_request() {
    let core = core_with(vec![]);
    let mut state = WorkflowState::new();
    route_text(&core, &mut state, "open the settings").await;
    route_text(&core, &mut state, "how should saving work?").await;
    route_text(&core, &mut state, "where should the button go?").await;
    assert_eq!(state.domains_touched().len(), 3);

    let response = route_text(&core, &mut state, "tell me about the weather").await;

    assert_eq!(response.handled_by, Some(HandlerId::Compressor));
    match &response.decision_trail[0] {
        TrailEntry::Classified { trigger, .. } => assert_eq!(
            *trigger,
            Some(TriggerMatch::DomainThreshold {
                touched: 3,
                threshold: 3
            })
        ),
        other => panic!("expected classification first, got {other:?}"),
    }
}

#[tokio::test]
async fn test_explicit_override_bypasses_tiers() {
    let core = core_with(vec![]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "route to network: where does the button go?").await;

    assert_eq!(response.handled_by, Some(HandlerId::Network));
    assert!(matches!(
        response.decision_trail[0],
        TrailEntry::Classified {
            reason: DecisionReason::ExplicitOverride,
            ..
        }
    ));
}

#[tokio::test]
async fn test_nothing_matches_answers_directly() {
    let core = core_with(vec![]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "good morning").await;

    assert_eq!(response.outcome, Outcome::Direct);
    assert!(response.invoked().is_empty());
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_chain_longer_than_bound_is_aborted() {
    let core = core_with_max_hops(
        2,
        vec![
            Arc::new(MockHandler::directing(HandlerId::Ui, "route to api")),
            Arc::new(MockHandler::directing(HandlerId::Api, "route to config")),
            Arc::new(MockHandler::directing(HandlerId::Config, "route to network")),
        ],
    );
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert_eq!(response.outcome, Outcome::Aborted);
    let diagnostic = response.error.as_ref().expect("diagnostic");
    assert_eq!(diagnostic.code, ErrorCode::ChainLengthExceeded);
    assert!(diagnostic.message.contains("3 hops, max 2"));
    assert_eq!(response.hops, 2);
    assert_eq!(state.hops(), 0);
}

#[tokio::test]
async fn test_chain_within_bound_completes() {
    let core = core_with(vec![
        Arc::new(MockHandler::directing(HandlerId::Ui, "route to api: button callbacks")),
        Arc::new(MockHandler::replying(HandlerId::Api, "onClick(handler)")),
    ]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert!(response.is_handled());
    assert_eq!(response.handled_by, Some(HandlerId::Api));
    assert_eq!(response.content, "onClick(handler)");
    assert_eq!(response.hops, 1);
    assert_eq!(state.handoff_chain()[0].justification, "button callbacks");

    let followed: Vec<_> = response
        .decision_trail
        .iter()
        .filter_map(|entry| match entry {
            TrailEntry::Classified {
                handler,
                reason: DecisionReason::HandoffFollow,
                ..
            } => *handler,
            _ => None,
        })
        .collect();
    assert_eq!(followed, vec![HandlerId::Api]);
}

#[tokio::test]
async fn test_unrecognized_directive_is_treated_as_final() {
    let core = core_with(vec![Arc::new(MockHandler::directing(
        HandlerId::Ui,
        "maybe ask the api person?",
    ))]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert!(response.is_handled());
    assert_eq!(response.handled_by, Some(HandlerId::Ui));
}

#[tokio::test]
async fn test_handler_failure_degrades_to_response() {
    let core = core_with(vec![Arc::new(MockHandler::with_failure(HandlerId::Ui))]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert_eq!(response.outcome, Outcome::Aborted);
    assert_eq!(
        response.error.as_ref().map(|d| d.code),
        Some(ErrorCode::HandlerFailed)
    );
    assert!(response.content.starts_with("[routing failed:"));
    assert!(state.active_handler().is_none());
}

#[tokio::test]
async fn test_ambiguous_tier_asks_for_clarification() {
    let panel = |id| {
        RoutingRule::new(
            Tier::DomainSpecific,
            id,
            50,
            TriggerSet::new().with_phrase("panel").unwrap(),
        )
    };
    let table = RuleTable::new(
        vec![panel(HandlerId::Ui), panel(HandlerId::Network)],
        PrecedenceMatrix::new(),
    );
    let handlers = HandlerSet::new()
        .with(Arc::new(MockHandler::new(HandlerId::Ui)))
        .with(Arc::new(MockHandler::new(HandlerId::Network)));
    let core = RouterCore::new(Arc::new(table), handlers, RouterSettings::default());
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "add a status panel").await;

    assert_eq!(response.outcome, Outcome::Clarification);
    assert!(response.invoked().is_empty());
    assert!(response.content.contains("ui, network"));
    assert_eq!(
        response.error.map(|d| d.code),
        Some(ErrorCode::AmbiguousMatch)
    );
}

#[test]
fn test_resolver_prefers_explicit_pairwise_winner() {
    let rule = |id| RoutingRule::new(Tier::DomainSpecific, id, 10, TriggerSet::new());
    let ui = rule(HandlerId::Ui);
    let network = rule(HandlerId::Network);
    let api = rule(HandlerId::Api);
    let matrix = PrecedenceMatrix::new()
        .with(HandlerId::Ui, HandlerId::Network)
        .with(HandlerId::Api, HandlerId::Ui)
        .with(HandlerId::Api, HandlerId::Network);

    let winner = ConflictResolver::new(&matrix)
        .resolve(Tier::DomainSpecific, &[&network, &ui, &api])
        .unwrap();

    assert_eq!(winner.target, HandlerId::Api);
}

#[tokio::test]
async fn test_only_one_handler_active_at_a_time() {
    let tracker = ActivityTracker::new();
    let core = core_with(vec![
        Arc::new(
            MockHandler::directing(HandlerId::Ui, "route to api").with_tracker(tracker.clone()),
        ),
        Arc::new(
            MockHandler::directing(HandlerId::Api, "route to config").with_tracker(tracker.clone()),
        ),
        Arc::new(MockHandler::new(HandlerId::Config).with_tracker(tracker.clone())),
    ]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "where should the button go?").await;

    assert!(response.is_handled());
    assert_eq!(tracker.total(), 3);
    assert_eq!(tracker.max_in_flight(), 1);
    assert!(state.active_handler().is_none());
}

#[tokio::test]
async fn test_handlers_see_themselves_as_active() {
    let ui = Arc::new(MockHandler::new(HandlerId::Ui));
    let core = core_with(vec![ui.clone()]);
    let mut state = WorkflowState::new();

    route_text(&core, &mut state, "where should the button go?").await;

    let calls = ui.calls().await;
    assert_eq!(calls[0].snapshot.active_handler, Some(HandlerId::Ui));
    // domain was recorded before the handler ran
    assert_eq!(calls[0].snapshot.domains_touched, vec![HandlerId::Ui]);
}

#[tokio::test]
async fn test_brief_ready_routes_follow_up_to_implementer() {
    let core = core_with(vec![]);
    let mut state = implementation_state(&core).await;

    let response = route_text(&core, &mut state, "tell me about the weather").await;

    assert_eq!(response.handled_by, Some(HandlerId::Implementer));
    match &response.decision_trail[0] {
        TrailEntry::Classified { trigger, .. } => {
            assert_eq!(*trigger, Some(TriggerMatch::BriefReady))
        }
        other => panic!("expected classification first, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stage_sequence_matches_transition_edges() {
    let core = core_with(vec![]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "write the brief").await;

    assert_eq!(
        stage_changes(&response.decision_trail),
        vec![
            (Stage::Research, Stage::Compression),
            (Stage::Compression, Stage::Implementation),
        ]
    );
}

#[tokio::test]
async fn test_research_gap_is_bounded_by_hop_limit() {
    let implementer = MockHandler::new(HandlerId::Implementer).then(HandlerResult::with_directive(
        "partial save code",
        "missing research api: need the cloud save endpoint signature",
    ));
    let core = core_with_max_hops(1, vec![Arc::new(implementer)]);
    let mut state = implementation_state(&core).await;

    let response = route_text(&core, &mut state, "write the code").await;

    assert_eq!(response.outcome, Outcome::Aborted);
    assert_eq!(
        response.error.as_ref().map(|d| d.code),
        Some(ErrorCode::ChainLengthExceeded)
    );
    assert_eq!(response.hops, 1);
    assert_eq!(
        response.invoked(),
        vec![HandlerId::Implementer, HandlerId::Api]
    );
    // the automatic return to the compressor never happened
    assert_eq!(state.stage(), Stage::Research);
    assert!(state.active_handler().is_none());
}

#[tokio::test]
async fn test_compressor_without_marker_stays_in_compression() {
    let core = core_with(vec![Arc::new(MockHandler::replying(
        HandlerId::Compressor,
        "partial brief, still gathering",
    ))]);
    let mut state = WorkflowState::new();

    let response = route_text(&core, &mut state, "summarize this").await;

    assert_eq!(response.handled_by, Some(HandlerId::Compressor));
    assert_eq!(
        stage_changes(&response.decision_trail),
        vec![(Stage::Research, Stage::Compression)]
    );
    assert_eq!(state.stage(), Stage::Compression);

    // no brief yet, so the brief-ready trigger stays quiet
    let follow_up = route_text(&core, &mut state, "go ahead").await;

    assert_eq!(follow_up.outcome, Outcome::Direct);
    assert!(!follow_up.invoked().contains(&HandlerId::Implementer));
    assert_eq!(state.stage(), Stage::Compression);
}

#[tokio::test]
async fn test_every_request_starts_with_fresh_classification() {
    let core = core_with(vec![
        Arc::new(MockHandler::directing(HandlerId::Ui, "route to api")),
        Arc::new(MockHandler::directing(HandlerId::Api, "route to physics")),
        Arc::new(MockHandler::with_failure(HandlerId::Network)),
    ]);
    let mut state = WorkflowState::new();

    for text in [
        "good morning",
        "where should the button go?",
        "set up a socket server",
        "what endpoint do I call?",
    ] {
        let response = route_text(&core, &mut state, text).await;

        assert!(state.active_handler().is_none(), "active handler left by {text:?}");
        assert!(
            matches!(
                response.decision_trail[0],
                TrailEntry::Classified {
                    reason: DecisionReason::RuleMatch | DecisionReason::NoMatch,
                    ..
                }
            ),
            "request {text:?} was not classified first"
        );
    }
}

//! Identification procedure scenario tests
//!
//! Runs the EMM task against the tokio timer service on paused time:
//! - Clean IMSI identification
//! - T3470 retransmissions until the limit is reached
//! - Identity Responses without a pending procedure
//! - Identity Request not delivered during a handover
//! - Lower layer failure and IMEISV requests

use std::time::Duration;

use integration_tests::harness::identity_requests;
use integration_tests::{
    imsi_identity, init_test_logging, nas_config, MmeHarness, TestUe, TEST_IMSI,
};
use nextgsim_common::config::NasConfig;
use nextgsim_common::{ImeiSv, MmeUeS1apId};
use nextgsim_mme::{
    AbortCause, EmmCause, EmmMessage, EmmNotification, EmmState, IdentityType, MobileIdentity,
    SecurityParams,
};

/// Default T3470 interval plus one clock tick
fn past_t3470() -> Duration {
    NasConfig::default().t3470_interval() + Duration::from_millis(1)
}

/// Start, answer with an unowned IMSI, confirm
#[tokio::test(start_paused = true)]
async fn test_clean_imsi_identification() {
    init_test_logging();

    let mut mme = MmeHarness::new(NasConfig::default());
    let ue = TestUe::new(42);
    mme.add_ue(&ue);

    mme.start_imsi(ue.ue_id, None).await;
    let started = mme.drain();
    assert_eq!(identity_requests(&started), 1);
    assert!(started.contains(&EmmNotification::ProcedureStarted { ue_id: ue.ue_id }));
    assert_eq!(mme.timers.active_count(), 1);

    mme.send(EmmMessage::IdentificationComplete {
        ue_id: ue.ue_id,
        identity: imsi_identity(TEST_IMSI),
    })
    .await;

    assert_eq!(
        mme.drain(),
        vec![EmmNotification::ProcedureConfirmed {
            ue_id: ue.ue_id,
            notify: true,
            free: true,
            previous_state: EmmState::Deregistered,
        }]
    );
    let imsi = mme
        .store
        .with_context(ue.ue_id, |ctx| ctx.imsi.clone())
        .flatten()
        .expect("IMSI stored on the context");
    assert_eq!(imsi.as_str(), TEST_IMSI);
    assert_eq!(mme.store.find_by_imsi(&imsi), Some(ue.ue_id));
    assert!(mme.identification(ue.ue_id).is_none());
    assert_eq!(mme.timers.active_count(), 0);

    // Nothing left to expire.
    mme.advance(past_t3470() * 4).await;
    assert!(mme.drain().is_empty());

    mme.shutdown().await;
}

/// Three T3470 expiries with a limit of three abort the procedure
#[tokio::test(start_paused = true)]
async fn test_exhausted_retransmissions() {
    init_test_logging();

    let mut mme = MmeHarness::new(nas_config(3));
    let ue = TestUe::new(7).with_state(EmmState::Registered);
    mme.add_ue(&ue);

    mme.start_imsi(ue.ue_id, None).await;
    assert_eq!(identity_requests(&mme.drain()), 1);

    for expected_count in 1..3 {
        mme.advance(past_t3470()).await;
        assert_eq!(identity_requests(&mme.drain()), 1);
        let record = mme.identification(ue.ue_id).expect("procedure still pending");
        assert_eq!(record.retransmission_count, expected_count);
        assert!(record.t3470.is_some());
    }

    mme.advance(past_t3470()).await;
    let notifications = mme.drain();
    assert_eq!(identity_requests(&notifications), 0);
    assert_eq!(
        notifications,
        vec![
            EmmNotification::ProcedureAborted {
                ue_id: ue.ue_id,
                notify: false,
                free: true,
                previous_state: EmmState::Registered,
                cause: AbortCause::RetransmissionExceeded,
            },
            EmmNotification::TeardownSession {
                ue_id: ue.ue_id,
                cause: EmmCause::ImplicitlyDetached,
            },
        ]
    );
    assert!(mme.identification(ue.ue_id).is_none());
    assert_eq!(mme.timers.active_count(), 0);

    // No fourth Identity Request.
    mme.advance(past_t3470() * 3).await;
    assert!(mme.drain().is_empty());

    mme.shutdown().await;
}

/// A response for a UE without a pending procedure is dropped
#[tokio::test(start_paused = true)]
async fn test_identity_response_without_procedure() {
    init_test_logging();

    let mut mme = MmeHarness::new(NasConfig::default());
    let known = TestUe::new(99);
    mme.add_ue(&known);

    mme.send(EmmMessage::IdentificationComplete {
        ue_id: known.ue_id,
        identity: imsi_identity(TEST_IMSI),
    })
    .await;
    // Unknown UE id as well.
    mme.send(EmmMessage::IdentificationComplete {
        ue_id: MmeUeS1apId(1234),
        identity: imsi_identity(TEST_IMSI),
    })
    .await;

    assert!(mme.drain().is_empty());
    assert!(mme
        .store
        .with_context(known.ue_id, |ctx| ctx.imsi.is_none())
        .unwrap_or(false));
    assert!(mme.registry.is_empty());

    mme.shutdown().await;
}

/// Handover non-delivery resends without counting a retransmission
#[tokio::test(start_paused = true)]
async fn test_non_delivery_during_handover() {
    init_test_logging();

    let mut mme = MmeHarness::new(NasConfig::default());
    let ue = TestUe::new(5);
    mme.add_ue(&ue);

    mme.start_imsi(ue.ue_id, None).await;
    mme.advance(past_t3470()).await;
    mme.drain();
    let before = mme.identification(ue.ue_id).expect("procedure pending");
    assert_eq!(before.retransmission_count, 1);

    mme.advance(Duration::from_secs(2)).await;
    mme.send(EmmMessage::NonDeliveredHo { ue_id: ue.ue_id }).await;

    let notifications = mme.drain();
    assert_eq!(
        notifications,
        vec![EmmNotification::SendIdentityRequest {
            ue_id: ue.ue_id,
            identity_type: IdentityType::Imsi,
            security: security_params(&mme, ue.ue_id),
        }]
    );
    let after = mme.identification(ue.ue_id).expect("procedure pending");
    assert_eq!(after.retransmission_count, 1);
    assert_ne!(after.t3470, before.t3470);
    assert_eq!(mme.timers.active_count(), 1);

    // The timer restarted at the resend, not at the previous transmission.
    mme.advance(Duration::from_secs(5)).await;
    assert!(mme.drain().is_empty());
    mme.advance(Duration::from_secs(1) + Duration::from_millis(1)).await;
    assert_eq!(identity_requests(&mme.drain()), 1);
    assert_eq!(
        mme.identification(ue.ue_id).map(|p| p.retransmission_count),
        Some(2)
    );

    mme.shutdown().await;
}

/// Lower layer failure aborts without tearing the session down
#[tokio::test(start_paused = true)]
async fn test_lower_layer_failure_aborts() {
    init_test_logging();

    let mut mme = MmeHarness::new(NasConfig::default());
    let ue = TestUe::new(11);
    mme.add_ue(&ue);

    mme.start_imsi(ue.ue_id, None).await;
    mme.drain();
    mme.send(EmmMessage::LowerLayerFailure { ue_id: ue.ue_id }).await;

    assert_eq!(
        mme.drain(),
        vec![EmmNotification::ProcedureAborted {
            ue_id: ue.ue_id,
            notify: false,
            free: true,
            previous_state: EmmState::Deregistered,
            cause: AbortCause::LowerLayerFailure,
        }]
    );
    assert!(mme.store.contains(ue.ue_id));
    assert_eq!(mme.timers.active_count(), 0);

    mme.advance(past_t3470()).await;
    assert!(mme.drain().is_empty());

    mme.shutdown().await;
}

/// IMEISV requests are answered and stored without touching the IMSI
#[tokio::test(start_paused = true)]
async fn test_imeisv_identification() {
    init_test_logging();

    let mut mme = MmeHarness::new(NasConfig::default());
    let ue = TestUe::new(21).with_imsi(TEST_IMSI);
    mme.add_ue(&ue);

    mme.send(EmmMessage::StartIdentification {
        ue_id: ue.ue_id,
        identity_type: IdentityType::ImeiSv,
        parent: None,
    })
    .await;
    mme.send(EmmMessage::IdentificationComplete {
        ue_id: ue.ue_id,
        identity: MobileIdentity::ImeiSv(ImeiSv::parse("3534900698733107").expect("valid IMEISV")),
    })
    .await;

    let notifications = mme.drain();
    assert!(notifications.iter().any(|n| matches!(
        n,
        EmmNotification::ProcedureConfirmed { notify: true, .. }
    )));
    let (imeisv, imsi) = mme
        .store
        .with_context(ue.ue_id, |ctx| (ctx.imeisv.clone(), ctx.imsi.clone()))
        .expect("context present");
    assert_eq!(imeisv.as_ref().map(|v| v.svn()), Some("07"));
    assert_eq!(imsi.as_ref().map(|i| i.as_str()), Some(TEST_IMSI));

    mme.shutdown().await;
}

fn security_params(mme: &MmeHarness, ue_id: MmeUeS1apId) -> SecurityParams {
    mme.store
        .with_context(ue_id, |ctx| ctx.security.params())
        .expect("context present")
}

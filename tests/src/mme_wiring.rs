//! EMM and MME_APP tasks wired together
//!
//! Builds the task graph the `nr-mme` binary builds: EMM notifications go to
//! the MME_APP task, which applies teardowns to the shared stores.

use std::sync::Arc;
use std::time::Duration;

use integration_tests::{
    imsi_identity, init_test_logging, nas_config, settle, wait_for_condition, TestUe,
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, TEST_IMSI,
};
use nextgsim_common::config::{MmeConfig, NasConfig};
use nextgsim_common::Imsi;
use nextgsim_mme::{
    EmmContextStore, EmmMessage, EmmState, EmmTask, IdentificationController, IdentityType,
    MmeAppRegistry, MmeAppTask, MmeTaskBase, NasTimerService, ProcedureId, SpecificProcedureKind,
};
use tokio::task::JoinHandle;

struct Mme {
    base: MmeTaskBase,
    store: Arc<EmmContextStore>,
    registry: Arc<MmeAppRegistry>,
    timers: Arc<NasTimerService>,
    joins: Vec<JoinHandle<()>>,
}

impl Mme {
    fn start(nas: NasConfig) -> Self {
        Self::with_config(MmeConfig {
            nas,
            ..MmeConfig::default()
        })
    }

    fn with_config(config: MmeConfig) -> Self {
        let nas = config.nas.clone();
        let (base, emm_rx, app_rx) = MmeTaskBase::new(config);
        let store = Arc::new(EmmContextStore::new());
        let registry = Arc::new(MmeAppRegistry::new());
        let timers = Arc::new(NasTimerService::new(base.emm_tx.clone()));

        let controller = IdentificationController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&timers),
            base.app_tx.clone(),
            nas,
        );
        let joins = vec![
            EmmTask::new(controller).spawn(emm_rx),
            MmeAppTask::new(Arc::clone(&store), Arc::clone(&registry), Arc::clone(&timers))
                .spawn(app_rx),
        ];

        Self {
            base,
            store,
            registry,
            timers,
            joins,
        }
    }

    async fn send(&self, msg: EmmMessage) {
        self.base.emm_tx.send(msg).await.expect("EMM task running");
    }

    async fn identify(&self, ue: &TestUe, parent: Option<ProcedureId>) {
        self.send(EmmMessage::StartIdentification {
            ue_id: ue.ue_id,
            identity_type: IdentityType::Imsi,
            parent,
        })
        .await;
        self.send(EmmMessage::IdentificationComplete {
            ue_id: ue.ue_id,
            identity: imsi_identity(TEST_IMSI),
        })
        .await;
    }

    async fn stop(self) {
        self.timers.stop_all();
        self.base.shutdown_all().await;
        for join in self.joins {
            join.await.expect("task exits cleanly");
        }
    }
}

/// The displaced context is removed and the new UE then claims the IMSI
#[tokio::test]
async fn test_collision_hands_imsi_to_new_context() {
    init_test_logging();

    let mme = Mme::start(NasConfig::default());
    let imsi = Imsi::parse(TEST_IMSI).expect("valid IMSI");
    let old = TestUe::new(100).with_state(EmmState::Registered);
    let new = TestUe::new(200);
    mme.store.insert(old.context());
    mme.store.insert(new.context());
    let attach = mme
        .store
        .begin_specific_procedure(new.ue_id, SpecificProcedureKind::Attach)
        .expect("context inserted");

    mme.identify(&old, None).await;
    wait_for_condition(
        || async { mme.registry.find_by_imsi(&imsi) == Some(old.ue_id) },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .expect("old UE registered in MME_APP");

    mme.identify(&new, Some(attach)).await;
    wait_for_condition(
        || async { !mme.store.contains(old.ue_id) && mme.registry.is_empty() },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .expect("old UE torn down");
    assert_eq!(mme.store.find_by_imsi(&imsi), None);

    // The attach retries identification once the old context is gone.
    mme.identify(&new, Some(attach)).await;
    wait_for_condition(
        || async { mme.registry.find_by_imsi(&imsi) == Some(new.ue_id) },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .expect("new UE registered in MME_APP");
    assert_eq!(mme.store.find_by_imsi(&imsi), Some(new.ue_id));

    mme.stop().await;
}

/// Exhausted retransmissions remove the EMM context and its timers
#[tokio::test(start_paused = true)]
async fn test_exhausted_retransmissions_remove_context() {
    init_test_logging();

    let nas = nas_config(2);
    let step = nas.t3470_interval() + Duration::from_millis(1);
    let mme = Mme::start(nas);
    let ue = TestUe::new(7);
    mme.store.insert(ue.context());

    mme.send(EmmMessage::StartIdentification {
        ue_id: ue.ue_id,
        identity_type: IdentityType::Imsi,
        parent: None,
    })
    .await;
    settle().await;
    assert_eq!(mme.timers.active_count(), 1);

    tokio::time::advance(step).await;
    settle().await;
    assert!(mme.store.contains(ue.ue_id));

    tokio::time::advance(step).await;
    settle().await;
    assert!(!mme.store.contains(ue.ue_id));
    assert_eq!(mme.timers.active_count(), 0);

    mme.stop().await;
}

/// Single-slot channels delay notifications but never lose the teardown
#[tokio::test(start_paused = true)]
async fn test_single_slot_channels_still_remove_context() {
    init_test_logging();

    let nas = nas_config(2);
    let step = nas.t3470_interval() + Duration::from_millis(1);
    let mme = Mme::with_config(MmeConfig {
        channel_capacity: 1,
        nas,
        ..MmeConfig::default()
    });
    let ues: Vec<TestUe> = (1..=4).map(TestUe::new).collect();
    for ue in &ues {
        mme.store.insert(ue.context());
        mme.send(EmmMessage::StartIdentification {
            ue_id: ue.ue_id,
            identity_type: IdentityType::Imsi,
            parent: None,
        })
        .await;
    }
    settle().await;

    tokio::time::advance(step).await;
    wait_for_condition(
        || async {
            ues.iter().all(|ue| {
                mme.store
                    .with_context(ue.ue_id, |ctx| {
                        ctx.procedures
                            .identification
                            .as_ref()
                            .is_some_and(|p| p.retransmission_count == 1 && p.t3470.is_some())
                    })
                    .unwrap_or(false)
            })
        },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .expect("every UE retransmitted once");

    tokio::time::advance(step).await;
    wait_for_condition(
        || async { ues.iter().all(|ue| !mme.store.contains(ue.ue_id)) },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .expect("every UE torn down");
    assert_eq!(mme.timers.active_count(), 0);

    mme.stop().await;
}

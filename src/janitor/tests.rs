//! Tests for the leaked-instance sweep.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8Path;

use crate::client::{ClientError, InstanceSpec, InstanceState, InstanceSummary, UploadKind};
use crate::control_plane::{ClientFuture, ControlPlane};

use super::{Janitor, JanitorError, SweepSummary};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> std::sync::MutexGuard<'a, T> {
    mutex
        .lock()
        .unwrap_or_else(|err| panic!("{what} lock poisoned: {err}"))
}

fn summary(id: &str, name: &str) -> InstanceSummary {
    InstanceSummary {
        id: id.to_owned(),
        name: name.to_owned(),
        state: InstanceState::On,
    }
}

struct FakeControlPlane {
    listed: Vec<InstanceSummary>,
    states: Mutex<VecDeque<Result<InstanceState, ClientError>>>,
    delete_results: Mutex<VecDeque<Result<(), ClientError>>>,
    deletes: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    fn new(
        listed: Vec<InstanceSummary>,
        states: impl IntoIterator<Item = Result<InstanceState, ClientError>>,
    ) -> Self {
        Self {
            listed,
            states: Mutex::new(states.into_iter().collect()),
            delete_results: Mutex::new(VecDeque::new()),
            deletes: Mutex::new(Vec::new()),
        }
    }

    fn deletes(&self) -> Vec<String> {
        lock(&self.deletes, "deletes").clone()
    }
}

impl ControlPlane for FakeControlPlane {
    fn project_id(&self) -> &str {
        "project-1234"
    }

    fn create_instance<'a>(&'a self, _spec: &'a InstanceSpec) -> ClientFuture<'a, String> {
        Box::pin(async move { panic!("janitor never creates instances") })
    }

    fn instance_state<'a>(&'a self, _instance_id: &'a str) -> ClientFuture<'a, InstanceState> {
        Box::pin(async move {
            lock(&self.states, "states")
                .pop_front()
                .unwrap_or_else(|| panic!("state script exhausted"))
        })
    }

    fn instance_ip<'a>(&'a self, _instance_id: &'a str) -> ClientFuture<'a, String> {
        Box::pin(async move { panic!("janitor never resolves addresses") })
    }

    fn console_log<'a>(&'a self, _instance_id: &'a str) -> ClientFuture<'a, String> {
        Box::pin(async move { panic!("janitor never reads consoles") })
    }

    fn console_url<'a>(&'a self, _instance_id: &'a str) -> ClientFuture<'a, String> {
        Box::pin(async move { panic!("janitor never opens consoles") })
    }

    fn upload_vmfile<'a>(
        &'a self,
        _kind: UploadKind,
        _path: &'a Utf8Path,
        _instance_id: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(async move { panic!("janitor never uploads") })
    }

    fn reboot_instance<'a>(&'a self, _instance_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move { panic!("janitor never reboots") })
    }

    fn delete_instance<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.deletes, "deletes").push(instance_id.to_owned());
            lock(&self.delete_results, "delete results")
                .pop_front()
                .unwrap_or(Ok(()))
        })
    }

    fn register_project_key<'a>(
        &'a self,
        _label: &'a str,
        _public_key: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(async move { panic!("janitor never registers keys") })
    }

    fn revoke_project_key<'a>(&'a self, _key_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move { panic!("janitor never revokes keys") })
    }

    fn list_instances(&self) -> ClientFuture<'_, Vec<InstanceSummary>> {
        Box::pin(async move { Ok(self.listed.clone()) })
    }
}

fn janitor(client: &FakeControlPlane) -> Janitor<'_, FakeControlPlane> {
    Janitor::new(client, Duration::from_millis(1), Duration::from_secs(1))
}

fn gone(id: &str) -> Result<InstanceState, ClientError> {
    Err(ClientError::not_found("instance", id))
}

#[tokio::test]
async fn sweep_deletes_only_harness_named_instances() {
    let client = FakeControlPlane::new(
        vec![
            summary("inst-1", "avh-harness-0001"),
            summary("inst-2", "someone-elses-box"),
            summary("inst-3", "avh-harness-0002"),
        ],
        [gone("inst-1"), gone("inst-3")],
    );

    let summary = janitor(&client)
        .sweep()
        .await
        .unwrap_or_else(|err| panic!("sweep should succeed: {err}"));

    assert_eq!(
        summary,
        SweepSummary {
            deleted: 2,
            skipped: 1,
        }
    );
    assert_eq!(client.deletes(), vec!["inst-1", "inst-3"]);
}

#[tokio::test]
async fn sweep_with_no_leaks_is_a_noop() {
    let client = FakeControlPlane::new(vec![summary("inst-2", "someone-elses-box")], []);

    let summary = janitor(&client)
        .sweep()
        .await
        .unwrap_or_else(|err| panic!("sweep should succeed: {err}"));

    assert_eq!(
        summary,
        SweepSummary {
            deleted: 0,
            skipped: 1,
        }
    );
    assert!(client.deletes().is_empty());
}

#[tokio::test]
async fn sweep_tolerates_instances_deleted_concurrently() {
    let client = FakeControlPlane::new(
        vec![summary("inst-1", "avh-harness-0001")],
        [gone("inst-1")],
    );
    *lock(&client.delete_results, "delete results") =
        VecDeque::from([Err(ClientError::not_found("instance", "inst-1"))]);

    let summary = janitor(&client)
        .sweep()
        .await
        .unwrap_or_else(|err| panic!("sweep should succeed: {err}"));
    assert_eq!(summary.deleted, 0);
}

#[tokio::test]
async fn sweep_fails_when_an_instance_refuses_to_die() {
    let client = FakeControlPlane::new(
        vec![summary("inst-1", "avh-harness-0001")],
        [Ok(InstanceState::Deleting)],
    );
    let janitor = Janitor::new(&client, Duration::from_millis(1), Duration::ZERO);

    let Err(JanitorError::NotClean { message }) = janitor.sweep().await else {
        panic!("lingering instance should fail the sweep");
    };
    assert!(message.contains("avh-harness-0001"));
}

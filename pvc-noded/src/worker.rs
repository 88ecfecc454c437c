//! Task worker pool: pulls task ids off this node's own
//! queue and executes them against the Migration Controller / Storage
//! Executor, reporting progress back through the Task Bus. Workers never
//! retry a task themselves and never pull from another node's queue.

use std::sync::Arc;
use std::time::Duration;

use pvc_core::entity::domain::DomainRunState;
use pvc_core::error::PvcResult;
use pvc_core::migration::MigrationController;
use pvc_core::storage_executor::StorageExecutor;
use pvc_core::tasks::TaskBus;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::view::NodeView;

pub struct TaskWorker {
    node: String,
    tasks: Arc<TaskBus>,
    view: Arc<NodeView>,
    migration: Arc<MigrationController>,
    storage: Arc<dyn StorageExecutor>,
    rbd_pool: String,
}

impl TaskWorker {
    pub fn new(
        node: impl Into<String>,
        tasks: Arc<TaskBus>,
        view: Arc<NodeView>,
        migration: Arc<MigrationController>,
        storage: Arc<dyn StorageExecutor>,
        rbd_pool: impl Into<String>,
    ) -> Self {
        Self { node: node.into(), tasks, view, migration, storage, rbd_pool: rbd_pool.into() }
    }

    /// Run `pool_size` concurrent pull loops against this node's queue
    /// until `cancel` fires.
    pub async fn run_pool(self: Arc<Self>, pool_size: usize, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(pool_size.max(1));
        for worker_id in 0..pool_size.max(1) {
            let this = self.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { this.pull_loop(worker_id, cancel).await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn pull_loop(&self, worker_id: usize, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.tasks.queued_for(&self.node).await {
                Ok(ids) => {
                    if let Some(id) = ids.into_iter().next() {
                        self.execute_one(&id).await;
                    } else {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                        }
                    }
                }
                Err(e) => {
                    warn!(worker_id, node = %self.node, error = %e, "failed to poll task queue");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn execute_one(&self, id: &str) {
        let task = match self.tasks.status(id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = id, error = %e, "failed to read claimed task descriptor");
                return;
            }
        };

        info!(task_id = id, name = %task.name, "executing task");
        let result = self.dispatch(&task.name, &task.kwargs).await;
        match result {
            Ok(value) => {
                if let Err(e) = self.tasks.report_success(id, value).await {
                    warn!(task_id = id, error = %e, "failed to record task success");
                }
            }
            Err(e) => {
                if let Err(report_err) = self.tasks.report_failure(id, e.to_string()).await {
                    warn!(task_id = id, error = %report_err, "failed to record task failure");
                }
            }
        }

        if let Err(e) = self.tasks.dequeue(&self.node, id).await {
            warn!(task_id = id, error = %e, "failed to dequeue completed task");
        }
    }

    async fn dispatch(&self, name: &str, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        match name {
            "vm.migrate" => self.do_migrate(kwargs).await,
            "vm.move" => self.do_move(kwargs).await,
            "vm.unmigrate" => self.do_unmigrate(kwargs).await,
            "vm.flush_locks" => self.do_flush_locks(kwargs).await,
            "vm.rename" => self.do_rename(kwargs).await,
            "osd.add" => self.do_osd_add(kwargs).await,
            "osd.remove" => self.do_osd_remove(kwargs).await,
            other => Err(pvc_core::PvcError::Validation(format!("unknown task {other}"))),
        }
    }

    fn str_kwarg<'a>(kwargs: &'a serde_json::Map<String, Value>, key: &str) -> PvcResult<&'a str> {
        kwargs
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| pvc_core::PvcError::Validation(format!("missing kwarg {key}")))
    }

    async fn do_migrate(&self, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        let vm = Self::str_kwarg(kwargs, "vm")?;
        let target = Self::str_kwarg(kwargs, "target")?;
        let force = kwargs.get("force").and_then(Value::as_bool).unwrap_or(false);
        let force_live = kwargs.get("force_live").and_then(Value::as_bool).unwrap_or(false);

        let domain = self.view.get_domain(vm).await?;
        let moved = self.migration.migrate(domain, target, force, force_live).await?;
        self.view.put_domain(&moved).await?;
        Ok(None)
    }

    async fn do_move(&self, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        let vm = Self::str_kwarg(kwargs, "vm")?;
        let target = Self::str_kwarg(kwargs, "target")?;
        let force_live = kwargs.get("force_live").and_then(Value::as_bool).unwrap_or(false);

        let domain = self.view.get_domain(vm).await?;
        let moved = self.migration.mv(domain, target, force_live).await?;
        self.view.put_domain(&moved).await?;
        Ok(None)
    }

    async fn do_unmigrate(&self, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        let vm = Self::str_kwarg(kwargs, "vm")?;
        let domain = self.view.get_domain(vm).await?;
        let returned = self.migration.unmigrate(domain).await?;
        self.view.put_domain(&returned).await?;
        Ok(None)
    }

    async fn do_flush_locks(&self, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        let vm = Self::str_kwarg(kwargs, "vm")?;
        let domain = self.view.get_domain(vm).await?;
        self.migration.flush_locks(&domain).await?;
        Ok(None)
    }

    /// `vm.rename`: renames the domain and, per the open-question-(a)
    /// rule, only the subset of its pool's volumes whose name contains
    /// the old VM name (see
    /// `pvc_core::entity::domain::volume_renames_for_vm`). Volume renames
    /// are attempted before the domain record is updated; if one fails
    /// partway through, the domain keeps its old name and the already-
    /// renamed volumes are left as-is rather than rolled back, per spec
    /// §7's recovery policy for executor-level state.
    async fn do_rename(&self, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        let vm = Self::str_kwarg(kwargs, "vm")?;
        let new_name = Self::str_kwarg(kwargs, "new_name")?;

        let mut domain = self.view.get_domain(vm).await?;
        let old_name = domain.name.clone();

        let volumes = self.storage.list_volumes(&self.rbd_pool).await?;
        let volume_names: Vec<String> = volumes.into_iter().map(|v| v.name).collect();
        let renames = pvc_core::entity::domain::volume_renames_for_vm(&old_name, new_name, &volume_names);

        for (old, new) in &renames {
            let result = self.storage.rename_volume(&self.rbd_pool, old, new).await?;
            if !result.ok {
                return Err(pvc_core::PvcError::ExecutorFailure { executor: "ceph", detail: result.message });
            }
        }

        domain.name = new_name.to_string();
        self.view.put_domain(&domain).await?;
        Ok(None)
    }

    async fn do_osd_add(&self, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        let node = Self::str_kwarg(kwargs, "node")?;
        let data_device = Self::str_kwarg(kwargs, "data_device")?;
        let db_device = kwargs.get("db_device").and_then(Value::as_str);
        let split_count = kwargs.get("split_count").and_then(Value::as_u64).map(|v| v as u32);

        let (result, osd) = self.storage.add_osd(node, data_device, db_device, split_count).await?;
        if !result.ok {
            return Err(pvc_core::PvcError::ExecutorFailure { executor: "ceph", detail: result.message });
        }
        if let Some(osd) = osd {
            self.view.put_osd(&osd).await?;
            return Ok(Some(serde_json::to_value(&osd)?));
        }
        Ok(None)
    }

    async fn do_osd_remove(&self, kwargs: &serde_json::Map<String, Value>) -> PvcResult<Option<Value>> {
        let osd_id: u32 = kwargs
            .get("osd_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| pvc_core::PvcError::Validation("missing/invalid osd_id".to_string()))?;
        let force = kwargs.get("force").and_then(Value::as_bool).unwrap_or(false);

        // Spec §9 open question (c): force skips the safe-to-destroy wait
        // but every step is still attempted in order, and a partial
        // failure is recorded truthfully rather than rolled back.
        if !force {
            self.wait_safe_to_destroy(osd_id).await;
        }
        let result = self.storage.remove_osd(osd_id, force).await?;
        if !result.ok {
            return Err(pvc_core::PvcError::ExecutorFailure { executor: "ceph", detail: result.message });
        }
        self.view.delete_osd(&osd_id.to_string()).await?;
        Ok(None)
    }

    async fn wait_safe_to_destroy(&self, osd_id: u32) {
        for _ in 0..30 {
            match self.storage.osd_state(osd_id).await {
                Ok(stats) if !stats.up && !stats.in_cluster => return,
                _ => tokio::time::sleep(Duration::from_secs(2)).await,
            }
        }
        warn!(osd_id, "proceeding with osd removal without confirmed safe-to-destroy");
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job description construction.
//!
//! A job description is a pure function of the run's identity, its pipeline
//! and arguments, and the fixed [`JobTemplateConfig`]. The manifest types
//! below cover exactly the `batch/v1` Job subset the launcher emits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::notify::RetryPolicy;

/// Label marking every job created by the launcher.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Label carrying the run ID.
pub const RUN_ID_LABEL: &str = "nextflow-launcher/run-id";

const CONTAINER_NAME: &str = "nf";
const WORK_VOLUME: &str = "work";
const CONFIG_VOLUME: &str = "config";

/// Fixed configuration shared by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplateConfig {
    /// Namespace jobs are created in
    pub namespace: String,
    /// Workload image
    pub image: String,
    /// Image pull policy
    pub image_pull_policy: String,
    /// Pod service account
    pub service_account: String,
    /// Work volume claim
    pub work_pvc: String,
    /// Config map holding the pipeline config
    pub config_map: String,
    /// Key of the pipeline config inside the config map
    pub config_map_key: String,
    /// Mount path of the work volume
    pub work_mount: String,
    /// Mount path of the config map
    pub conf_mount: String,
    /// Job backoff limit
    pub backoff_limit: i32,
    /// Launcher conclude endpoint the workload calls back
    pub conclude_url: String,
    /// Retry policy for the workload's conclude call
    pub conclude_retry: RetryPolicy,
}

impl Default for JobTemplateConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "nextflow/nextflow:24.10.0".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            service_account: "nextflow-sa".to_string(),
            work_pvc: "nextflow-work".to_string(),
            config_map: "nextflow-config".to_string(),
            config_map_key: "nextflow.config".to_string(),
            work_mount: "/workspace".to_string(),
            conf_mount: "/conf".to_string(),
            backoff_limit: 0,
            conclude_url: "http://nextflow-launcher:8000/nextflow/conclude".to_string(),
            conclude_retry: RetryPolicy::default(),
        }
    }
}

impl JobTemplateConfig {
    fn config_path(&self) -> String {
        format!(
            "{}/{}",
            self.conf_mount.trim_end_matches('/'),
            self.config_map_key
        )
    }

    fn work_path(&self, suffix: &str) -> String {
        format!("{}/{}", self.work_mount.trim_end_matches('/'), suffix)
    }
}

/// Everything the backend needs to launch one run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    /// Run ID, also the job name.
    pub run_id: String,
    /// Pipeline to execute.
    pub pipeline_name: String,
    /// Pipeline arguments, in order.
    pub run_args: Vec<String>,
    /// Exact pipeline command vector.
    pub command: Vec<String>,
    /// Kubernetes Job manifest.
    pub manifest: Job,
}

/// `batch/v1` Job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Always `batch/v1`.
    pub api_version: String,
    /// Always `Job`.
    pub kind: String,
    /// Job metadata.
    pub metadata: ObjectMeta,
    /// Job spec.
    pub spec: JobSpec,
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Object namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Job spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Retries before the job is marked failed.
    pub backoff_limit: i32,
    /// Pod template.
    pub template: PodTemplateSpec,
}

/// Pod template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Pod metadata.
    pub metadata: ObjectMeta,
    /// Pod spec.
    pub spec: PodSpec,
}

/// Pod spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Service account the pod runs as.
    pub service_account_name: String,
    /// Pod restart policy.
    pub restart_policy: String,
    /// Containers.
    pub containers: Vec<Container>,
    /// Volumes.
    pub volumes: Vec<Volume>,
}

/// Container spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Image pull policy.
    pub image_pull_policy: String,
    /// Entrypoint.
    pub command: Vec<String>,
    /// Entrypoint arguments.
    pub args: Vec<String>,
    /// Environment.
    pub env: Vec<EnvVar>,
    /// Volume mounts.
    pub volume_mounts: Vec<VolumeMount>,
}

/// Literal environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Volume mount inside a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name.
    pub name: String,
    /// Mount path.
    pub mount_path: String,
}

/// Pod volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Claim source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimSource>,
    /// Config map source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapSource>,
}

/// Volume backed by a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSource {
    /// Claim name.
    pub claim_name: String,
}

/// Volume backed by a config map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapSource {
    /// Config map name.
    pub name: String,
    /// Keys to project.
    pub items: Vec<KeyToPath>,
}

/// Config map key projected to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyToPath {
    /// Config map key.
    pub key: String,
    /// Relative file path.
    pub path: String,
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `nextflow run <pipeline> -c <config> <args...>`
pub fn pipeline_command(
    pipeline_name: &str,
    run_args: &[String],
    template: &JobTemplateConfig,
) -> Vec<String> {
    let mut command = vec![
        "nextflow".to_string(),
        "run".to_string(),
        pipeline_name.to_string(),
        "-c".to_string(),
        template.config_path(),
    ];
    command.extend(run_args.iter().cloned());
    command
}

/// Container script: run the pipeline, report the outcome once on exit.
///
/// The pipeline publishes into `$LAUNCHER_RESULT_PATH`; an `--outdir` in the
/// caller's arguments is overridden.
fn workload_script(command: &[String], template: &JobTemplateConfig) -> String {
    let quoted: Vec<String> = command.iter().map(|part| shell_quote(part)).collect();
    let attempts = template.conclude_retry.max_attempts.max(1);
    let base_delay_secs = template
        .conclude_retry
        .base_delay
        .as_secs()
        .max(1);

    format!(
        r#"set -Euo pipefail

conclude() {{
    local body delay attempt
    body=$(printf '{{"run_id":"%s","run_status":"%s","result_location":"%s"}}' \
        "$LAUNCHER_RUN_ID" "$1" "$LAUNCHER_RUN_ID")
    delay={base_delay_secs}
    for attempt in $(seq 1 {attempts}); do
        if wget -q -O /dev/null --header='Content-Type: application/json' \
            --post-data="$body" "$LAUNCHER_CONCLUDE_URL"; then
            return 0
        fi
        if [ "$attempt" -lt {attempts} ]; then
            sleep "$delay"
            delay=$((delay * 2))
        fi
    done
    echo "conclude failed after {attempts} attempts" >&2
}}

on_exit() {{
    local rc=$?
    trap - EXIT
    if [ "$rc" -eq 0 ]; then conclude succeeded; else conclude failed; fi
    exit "$rc"
}}
trap on_exit EXIT

set -e
mkdir -p "$LAUNCHER_RESULT_PATH"
echo 'Nextflow:' && nextflow -version
echo 'Using config:' && cat {config}
{command} --outdir "$LAUNCHER_RESULT_PATH"
"#,
        config = shell_quote(&template.config_path()),
        command = quoted.join(" "),
    )
}

/// Build the job description for a run.
pub fn build_job_description(
    run_id: &str,
    pipeline_name: &str,
    run_args: &[String],
    template: &JobTemplateConfig,
) -> JobDescription {
    let command = pipeline_command(pipeline_name, run_args, template);

    let labels: BTreeMap<String, String> = [
        (MANAGED_BY_LABEL.to_string(), "nextflow-launcher".to_string()),
        (RUN_ID_LABEL.to_string(), run_id.to_string()),
    ]
    .into_iter()
    .collect();

    let env = [
        ("NXF_HOME", template.work_path(".nextflow")),
        ("NXF_WORK", template.work_path("work")),
        ("LAUNCHER_RUN_ID", run_id.to_string()),
        ("LAUNCHER_CONCLUDE_URL", template.conclude_url.clone()),
        (
            "LAUNCHER_INPUT_PATH",
            template.work_path(&format!("staging/{}/input", run_id)),
        ),
        (
            "LAUNCHER_RESULT_PATH",
            template.work_path(&format!("results/{}", run_id)),
        ),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value,
    })
    .collect();

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: template.image.clone(),
        image_pull_policy: template.image_pull_policy.clone(),
        command: vec!["/bin/bash".to_string(), "-lc".to_string()],
        args: vec![workload_script(&command, template)],
        env,
        volume_mounts: vec![
            VolumeMount {
                name: WORK_VOLUME.to_string(),
                mount_path: template.work_mount.clone(),
            },
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: template.conf_mount.clone(),
            },
        ],
    };

    let manifest = Job {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        metadata: ObjectMeta {
            name: Some(run_id.to_string()),
            namespace: Some(template.namespace.clone()),
            labels: labels.clone(),
        },
        spec: JobSpec {
            backoff_limit: template.backoff_limit,
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    name: None,
                    namespace: None,
                    labels,
                },
                spec: PodSpec {
                    service_account_name: template.service_account.clone(),
                    restart_policy: "Never".to_string(),
                    containers: vec![container],
                    volumes: vec![
                        Volume {
                            name: WORK_VOLUME.to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimSource {
                                claim_name: template.work_pvc.clone(),
                            }),
                            config_map: None,
                        },
                        Volume {
                            name: CONFIG_VOLUME.to_string(),
                            persistent_volume_claim: None,
                            config_map: Some(ConfigMapSource {
                                name: template.config_map.clone(),
                                items: vec![KeyToPath {
                                    key: template.config_map_key.clone(),
                                    path: template.config_map_key.clone(),
                                }],
                            }),
                        },
                    ],
                },
            },
        },
    };

    JobDescription {
        run_id: run_id.to_string(),
        pipeline_name: pipeline_name.to_string(),
        run_args: run_args.to_vec(),
        command,
        manifest,
    }
}

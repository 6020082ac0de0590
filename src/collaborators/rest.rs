//! # REST Collaborators
//!
//! Production implementation of the table backends over the platform's
//! REST API and the herald delivery service.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::errors::CollaboratorResult;
use super::http::HttpServiceClient;
use crate::config::{CollaboratorsConfig, ConfigResult};
use crate::tables::checklist::{Checklist, ChecklistBackend, RunStatus};
use crate::tables::infra::{InfraBackend, InstancesStatus, Runset};
use crate::tables::report::{Recipient, ReportBackend, ReportDocument, ReportSchedule};

const API_PREFIX: &str = "restapi/v2";

#[derive(Debug, Deserialize)]
struct RunCreated {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct ScopeList {
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecipientList {
    recipients: Vec<Recipient>,
}

#[derive(Debug, Deserialize)]
struct IdList {
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RunsProgress {
    finished: bool,
}

#[derive(Debug, Clone)]
pub struct RestCollaborators {
    rest_api: HttpServiceClient,
    herald: HttpServiceClient,
}

impl RestCollaborators {
    pub fn new(rest_api: HttpServiceClient, herald: HttpServiceClient) -> Self {
        Self { rest_api, herald }
    }

    pub fn from_config(config: &CollaboratorsConfig) -> ConfigResult<Self> {
        let secret = config.cluster_secret.as_deref();
        let rest_api = HttpServiceClient::new(
            "rest_api",
            &config.rest_api_url,
            config.request_timeout(),
            secret,
        )?;
        let herald =
            HttpServiceClient::new("herald", &config.herald_url, config.request_timeout(), secret)?;
        Ok(Self::new(rest_api, herald))
    }

    fn api(path: &str) -> String {
        format!("{API_PREFIX}/{path}")
    }
}

#[async_trait]
impl ChecklistBackend for RestCollaborators {
    async fn find_checklist(&self, organization_id: &str) -> CollaboratorResult<Checklist> {
        self.rest_api
            .get_json(&Self::api(&format!("organizations/{organization_id}/checklist")))
            .await
    }

    async fn begin_run(&self, checklist_id: &str) -> CollaboratorResult<String> {
        let created: RunCreated = self
            .rest_api
            .post_json(&Self::api(&format!("checklists/{checklist_id}/runs")), &json!({}))
            .await?;
        Ok(created.run_id)
    }

    async fn run_status(&self, checklist_id: &str, run_id: &str) -> CollaboratorResult<RunStatus> {
        self.rest_api
            .get_json(&Self::api(&format!("checklists/{checklist_id}/runs/{run_id}")))
            .await
    }

    async fn complete_checklist(&self, checklist_id: &str, run_id: &str) -> CollaboratorResult<()> {
        let _: Value = self
            .rest_api
            .patch_json(
                &Self::api(&format!("checklists/{checklist_id}")),
                &json!({ "last_run_id": run_id, "last_completed": Utc::now().timestamp() }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReportBackend for RestCollaborators {
    async fn find_schedule(&self, schedule_id: &str) -> CollaboratorResult<ReportSchedule> {
        self.rest_api
            .get_json(&Self::api(&format!("schedules/{schedule_id}")))
            .await
    }

    async fn mark_run_started(&self, schedule_id: &str) -> CollaboratorResult<()> {
        let _: Value = self
            .rest_api
            .patch_json(
                &Self::api(&format!("schedules/{schedule_id}")),
                &json!({ "last_run": Utc::now().timestamp() }),
            )
            .await?;
        Ok(())
    }

    async fn get_scopes(&self, schedule_id: &str) -> CollaboratorResult<Vec<String>> {
        let list: ScopeList = self
            .rest_api
            .get_json(&Self::api(&format!("schedules/{schedule_id}/scopes")))
            .await?;
        Ok(list.scopes)
    }

    async fn get_recipients(
        &self,
        schedule_id: &str,
        scopes: &[String],
    ) -> CollaboratorResult<Vec<Recipient>> {
        let list: RecipientList = self
            .rest_api
            .post_json(
                &Self::api(&format!("schedules/{schedule_id}/recipients")),
                &json!({ "scopes": scopes }),
            )
            .await?;
        Ok(list.recipients)
    }

    async fn generate_data(&self, report_id: &str, recipient: &Recipient) -> CollaboratorResult<Value> {
        self.rest_api
            .post_json(&Self::api(&format!("reports/{report_id}/data")), recipient)
            .await
    }

    async fn deliver(&self, idempotency_key: &str, document: &ReportDocument) -> CollaboratorResult<()> {
        let _: Value = self
            .herald
            .post_json(
                "herald/v2/email",
                &json!({
                    "idempotency_key": idempotency_key,
                    "email": [document.recipient.email],
                    "template_type": "report",
                    "template_params": document.data,
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InfraBackend for RestCollaborators {
    async fn find_runset(&self, runset_id: &str) -> CollaboratorResult<Runset> {
        self.rest_api
            .get_json(&Self::api(&format!("runsets/{runset_id}")))
            .await
    }

    async fn prepare_runners(&self, runset_id: &str) -> CollaboratorResult<Vec<String>> {
        let list: IdList = self
            .rest_api
            .post_json(&Self::api(&format!("runsets/{runset_id}/runners")), &json!({}))
            .await?;
        Ok(list.ids)
    }

    async fn start_instances(
        &self,
        runset_id: &str,
        runner_ids: &[String],
    ) -> CollaboratorResult<Vec<String>> {
        let list: IdList = self
            .rest_api
            .post_json(
                &Self::api(&format!("runsets/{runset_id}/instances")),
                &json!({ "runner_ids": runner_ids }),
            )
            .await?;
        Ok(list.ids)
    }

    async fn instances_status(&self, instance_ids: &[String]) -> CollaboratorResult<InstancesStatus> {
        self.rest_api
            .post_json(&Self::api("instances/status"), &json!({ "ids": instance_ids }))
            .await
    }

    async fn runs_finished(&self, runset_id: &str) -> CollaboratorResult<bool> {
        let progress: RunsProgress = self
            .rest_api
            .get_json(&Self::api(&format!("runsets/{runset_id}/runs/progress")))
            .await?;
        Ok(progress.finished)
    }

    async fn prepare_destroy(&self, runset_id: &str, reason: &str) -> CollaboratorResult<()> {
        let _: Value = self
            .rest_api
            .patch_json(
                &Self::api(&format!("runsets/{runset_id}")),
                &json!({ "state": "destroy_preparing", "destroy_reason": reason }),
            )
            .await?;
        Ok(())
    }

    async fn destroy_instances(&self, instance_ids: &[String]) -> CollaboratorResult<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let _: Value = self
            .rest_api
            .post_json(&Self::api("instances/destroy"), &json!({ "ids": instance_ids }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collaborators(server: &MockServer) -> RestCollaborators {
        let client = |service| {
            HttpServiceClient::new(service, &server.uri(), Duration::from_secs(2), Some("s3cret"))
                .unwrap()
        };
        RestCollaborators::new(client("rest_api"), client("herald"))
    }

    #[tokio::test]
    async fn test_checklist_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/restapi/v2/organizations/org-1/checklist"))
            .and(header("Secret", "s3cret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "cl-1", "organization_id": "org-1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/restapi/v2/checklists/cl-1/runs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"run_id": "run-9"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/restapi/v2/checklists/cl-1/runs/run-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "succeeded"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/restapi/v2/checklists/cl-1"))
            .and(body_partial_json(json!({"last_run_id": "run-9"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let rest = collaborators(&server);
        let checklist = rest.find_checklist("org-1").await.unwrap();
        assert_eq!(
            checklist,
            Checklist {
                id: "cl-1".to_string(),
                organization_id: "org-1".to_string()
            }
        );
        let run_id = rest.begin_run(&checklist.id).await.unwrap();
        assert_eq!(run_id, "run-9");
        assert_eq!(rest.run_status("cl-1", &run_id).await.unwrap(), RunStatus::Succeeded);
        rest.complete_checklist("cl-1", &run_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/restapi/v2/schedules/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("schedule gone"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/restapi/v2/runsets/rs-1/runs/progress"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/restapi/v2/runsets/rs-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let rest = collaborators(&server);
        let not_found = rest.find_schedule("gone").await.unwrap_err();
        assert!(matches!(not_found, CollaboratorError::NotFound { .. }));
        assert!(!not_found.is_transient());

        let unavailable = rest.runs_finished("rs-1").await.unwrap_err();
        assert!(matches!(unavailable, CollaboratorError::Unavailable { .. }));
        assert!(unavailable.is_transient());

        let garbled = rest.find_runset("rs-1").await.unwrap_err();
        assert!(matches!(garbled, CollaboratorError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_infra_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/restapi/v2/runsets/rs-1/instances"))
            .and(body_partial_json(json!({"runner_ids": ["r-1", "r-2"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": ["i-1", "i-2"]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/restapi/v2/instances/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "failed", "reason": "quota exceeded"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/restapi/v2/runsets/rs-1/runs/progress"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"finished": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/restapi/v2/instances/destroy"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let rest = collaborators(&server);
        let runners = vec!["r-1".to_string(), "r-2".to_string()];
        let instances = rest.start_instances("rs-1", &runners).await.unwrap();
        assert_eq!(instances, vec!["i-1", "i-2"]);
        assert_eq!(
            rest.instances_status(&instances).await.unwrap(),
            InstancesStatus::Failed {
                reason: "quota exceeded".to_string()
            }
        );
        assert!(rest.runs_finished("rs-1").await.unwrap());
        // nothing started, nothing to tear down
        rest.destroy_instances(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_goes_to_herald_with_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/herald/v2/email"))
            .and(body_partial_json(json!({
                "idempotency_key": "task-1:emp-1",
                "email": ["emp-1@example.com"],
                "template_type": "report",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queued": true})))
            .expect(1)
            .mount(&server)
            .await;

        let document = ReportDocument {
            recipient: Recipient {
                employee_id: "emp-1".to_string(),
                email: "emp-1@example.com".to_string(),
                scope_id: "pool-1".to_string(),
            },
            data: json!({"total_cost": 12.5}),
        };
        collaborators(&server)
            .deliver("task-1:emp-1", &document)
            .await
            .unwrap();
    }

    #[test]
    fn test_from_default_config() {
        let collaborators = RestCollaborators::from_config(&CollaboratorsConfig::default()).unwrap();
        assert_eq!(
            collaborators.rest_api.url(&RestCollaborators::api("runsets/r-1")),
            "http://localhost:8999/restapi/v2/runsets/r-1"
        );
        assert_eq!(collaborators.herald.service(), "herald");
    }

    #[test]
    fn test_run_status_wire_format() {
        let status: RunStatus =
            serde_json::from_value(json!({"status": "failed", "reason": "quota"})).unwrap();
        assert_eq!(
            status,
            RunStatus::Failed {
                reason: "quota".to_string()
            }
        );
    }
}

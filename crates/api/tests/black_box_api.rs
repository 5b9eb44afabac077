use batchforge_api::app::{build_app, services::AppServices};
use batchforge_api::demo::{DemoOptions, demo_registry_with};
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory store, no step sleeps, ephemeral port.
        let registry = demo_registry_with(DemoOptions::fast()).expect("demo registry");
        let app = build_app(AppServices::in_memory(registry));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn launch(client: &reqwest::Client, srv: &TestServer, job: &str, body: Value) -> Value {
    let res = client
        .post(srv.url(&format!("/jobs/{job}/launch")))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    res.json().await.unwrap()
}

/// Launches run on a background worker; poll until `count` executions have
/// reached a terminal status.
async fn finished_executions(
    client: &reqwest::Client,
    srv: &TestServer,
    count: usize,
) -> Vec<Value> {
    for _ in 0..200 {
        let res = client.get(srv.url("/executions")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let executions: Vec<Value> = res.json().await.unwrap();
        let finished = executions
            .iter()
            .filter(|e| e["status"] == "COMPLETED" || e["status"] == "FAILED")
            .count();
        if executions.len() >= count && finished >= count {
            return executions;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("executions did not finish within timeout");
}

async fn steps_of(client: &reqwest::Client, srv: &TestServer, execution_id: &str) -> Vec<Value> {
    let res = client
        .get(srv.url(&format!("/executions/{execution_id}/steps")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

#[tokio::test]
async fn health_and_job_listing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let jobs: Vec<Value> = client
        .get(srv.url("/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = jobs.iter().map(|j| j["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["CleaningJob", "FailingJob", "SampleJob", "SquaresJob"]);
    let squares = jobs.iter().find(|j| j["name"] == "SquaresJob").unwrap();
    assert_eq!(squares["steps"][0]["kind"], "chunk");
    assert_eq!(squares["steps"][0]["chunk_size"], 10);
}

#[tokio::test]
async fn unknown_job_is_rejected_before_any_record() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/jobs/NoSuchJob/launch"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let executions: Vec<Value> = client
        .get(srv.url("/executions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(executions.is_empty());
}

#[tokio::test]
async fn sample_job_completes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let ack = launch(&client, &srv, "SampleJob", json!({ "parameters": { "run": 1 } })).await;
    assert_eq!(ack["message"], "Job submitted");
    assert_eq!(ack["job_name"], "SampleJob");

    let executions = finished_executions(&client, &srv, 1).await;
    let id = executions[0]["id"].as_str().unwrap().to_string();

    let execution: Value = client
        .get(srv.url(&format!("/executions/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(execution["status"], "COMPLETED");
    assert_eq!(execution["exit_code"], "COMPLETED");
    assert!(execution["end_time"].is_string());

    let steps = steps_of(&client, &srv, &id).await;
    let names: Vec<&str> = steps.iter().map(|s| s["step_name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Step1", "Step2"]);
    assert!(steps.iter().all(|s| s["status"] == "COMPLETED"));
}

#[tokio::test]
async fn failing_job_fails_then_resumes_at_the_failed_step() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    launch(&client, &srv, "FailingJob", json!({})).await;
    let first = finished_executions(&client, &srv, 1).await;
    assert_eq!(first[0]["status"], "FAILED");
    assert_eq!(first[0]["exit_message"], "Something went wrong!");

    let first_id = first[0]["id"].as_str().unwrap().to_string();
    let steps = steps_of(&client, &srv, &first_id).await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["status"], "COMPLETED");
    assert_eq!(steps[1]["step_name"], "ErrorStep");
    assert_eq!(steps[1]["status"], "FAILED");

    // Same (empty) parameters: same instance, Step1 is not re-run.
    launch(&client, &srv, "FailingJob", json!({})).await;
    let both = finished_executions(&client, &srv, 2).await;
    let second = both
        .iter()
        .find(|e| e["id"] != first_id.as_str())
        .unwrap();
    assert_eq!(second["job_instance_id"], first[0]["job_instance_id"]);

    let steps = steps_of(&client, &srv, second["id"].as_str().unwrap()).await;
    let names: Vec<&str> = steps.iter().map(|s| s["step_name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["ErrorStep"]);
}

#[tokio::test]
async fn squares_job_reports_chunk_counters() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    launch(&client, &srv, "SquaresJob", json!({})).await;
    let executions = finished_executions(&client, &srv, 1).await;
    assert_eq!(executions[0]["status"], "COMPLETED");

    let steps = steps_of(&client, &srv, executions[0]["id"].as_str().unwrap()).await;
    let step = &steps[0];
    assert_eq!(step["read_count"], 50);
    assert_eq!(step["commit_count"], 5);
    assert_eq!(step["filter_count"], 25);
    assert_eq!(step["write_count"], 25);
}

#[tokio::test]
async fn cleaning_job_skips_bad_rows() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    launch(&client, &srv, "CleaningJob", json!({})).await;
    let executions = finished_executions(&client, &srv, 1).await;
    assert_eq!(executions[0]["status"], "COMPLETED");

    let steps = steps_of(&client, &srv, executions[0]["id"].as_str().unwrap()).await;
    let step = &steps[0];
    assert_eq!(step["read_count"], 6);
    assert_eq!(step["skip_count"], 2);
    assert_eq!(step["filter_count"], 2);
    assert_eq!(step["write_count"], 2);
    assert_eq!(step["commit_count"], 2);
}

#[tokio::test]
async fn forced_relaunch_reruns_completed_steps() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    launch(&client, &srv, "SampleJob", json!({})).await;
    finished_executions(&client, &srv, 1).await;

    launch(&client, &srv, "SampleJob", json!({ "force": true })).await;
    let both = finished_executions(&client, &srv, 2).await;
    for execution in &both {
        let steps = steps_of(&client, &srv, execution["id"].as_str().unwrap()).await;
        assert_eq!(steps.len(), 2);
    }
}

#[tokio::test]
async fn execution_ids_are_validated() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/executions/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let unknown = "0190f3c4-0000-7000-8000-000000000000";
    let res = client
        .get(srv.url(&format!("/executions/{unknown}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url(&format!("/executions/{unknown}/steps")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::{Duration, Utc};
use db::{
    DBService,
    models::{
        course::ToolboxTalkCourse,
        employee::{CreateEmployee, Employee},
        toolbox_talk::{
            CreateQuestion, CreateSection, CreateToolboxTalk, QuestionType, ToolboxTalk,
            ToolboxTalkQuestion, ToolboxTalkSection,
        },
    },
};
use serde_json::{Value, json};
use server::{AppState, routes};
use services::services::{
    config::Config,
    content::{ContentStore, SqliteContentStore},
    localization::{
        LocalizationPipeline,
        providers::{ProviderError, TranslationProvider},
    },
};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    state: AppState,
    db: DBService,
    tenant_id: Uuid,
}

/// Uppercases everything it is asked to translate.
struct ShoutingTranslator;

#[async_trait::async_trait]
impl TranslationProvider for ShoutingTranslator {
    async fn translate(
        &self,
        texts: &[String],
        _source_language: &str,
        _target_language: &str,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(texts.iter().map(|t| t.to_uppercase()).collect())
    }
}

enum Caller {
    Admin,
    Employee(Uuid),
    Anonymous,
}

impl TestApp {
    async fn new() -> Self {
        let db = DBService::new_in_memory().await.unwrap();
        Self::from_state(AppState::new(db.clone(), Config::default()), db)
    }

    async fn with_translator() -> Self {
        let db = DBService::new_in_memory().await.unwrap();
        let content: std::sync::Arc<dyn ContentStore> =
            std::sync::Arc::new(SqliteContentStore::new(db.clone()));
        let pipeline = LocalizationPipeline::new(
            db.clone(),
            content,
            Some(std::sync::Arc::new(ShoutingTranslator)),
            None,
            2,
            std::time::Duration::from_secs(5),
        );
        let state = AppState::new(db.clone(), Config::default()).with_localization(pipeline);
        Self::from_state(state, db)
    }

    fn from_state(state: AppState, db: DBService) -> Self {
        Self {
            router: routes::router(state.clone()),
            state,
            db,
            tenant_id: Uuid::new_v4(),
        }
    }

    async fn request(
        &self,
        caller: Caller,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        match caller {
            Caller::Admin => {
                builder = builder
                    .header("x-tenant-id", self.tenant_id.to_string())
                    .header("x-role", "admin");
            }
            Caller::Employee(employee_id) => {
                builder = builder
                    .header("x-tenant-id", self.tenant_id.to_string())
                    .header("x-employee-id", employee_id.to_string());
            }
            Caller::Anonymous => {}
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn employee(&self, name: &str) -> Employee {
        Employee::create(
            &self.db.pool,
            CreateEmployee {
                tenant_id: self.tenant_id,
                full_name: name.to_string(),
                email: None,
                preferred_language: None,
            },
        )
        .await
        .unwrap()
    }

    /// Two sections, one multiple choice question (index 1 correct) and one
    /// true/false question ("True").
    async fn talk(&self, title: &str) -> ToolboxTalk {
        let talk = ToolboxTalk::create(
            &self.db.pool,
            CreateToolboxTalk {
                tenant_id: self.tenant_id,
                title: title.to_string(),
                description: None,
                source_language: None,
                video_url: None,
                minimum_video_watch_percent: None,
                passing_score: Some(80),
                max_quiz_attempts: None,
                generate_certificate: true,
            },
            90,
        )
        .await
        .unwrap();
        for n in 1..=2 {
            ToolboxTalkSection::create(
                &self.db.pool,
                talk.id,
                n,
                CreateSection {
                    title: format!("Section {n}"),
                    content: "Keep three points of contact.".to_string(),
                    requires_acknowledgment: true,
                },
            )
            .await
            .unwrap();
        }
        ToolboxTalkQuestion::create(
            &self.db.pool,
            talk.id,
            1,
            CreateQuestion {
                question_text: "Which ladder angle is correct?".to_string(),
                question_type: QuestionType::MultipleChoice,
                options: vec!["60 degrees".into(), "75 degrees".into(), "90 degrees".into()],
                correct_answer: None,
                correct_option_index: Some(1),
                points: 1,
            },
        )
        .await
        .unwrap();
        ToolboxTalkQuestion::create(
            &self.db.pool,
            talk.id,
            2,
            CreateQuestion {
                question_text: "Ladders must be inspected before use.".to_string(),
                question_type: QuestionType::TrueFalse,
                options: vec![],
                correct_answer: Some("True".to_string()),
                correct_option_index: None,
                points: 1,
            },
        )
        .await
        .unwrap();
        talk
    }

    /// Creates an active one-off schedule for today and expands it.
    async fn assign(&self, talk_id: Uuid, employee_id: Uuid) -> Uuid {
        let (status, created) = self
            .request(
                Caller::Admin,
                Method::POST,
                "/api/schedules",
                Some(json!({
                    "talk_id": talk_id,
                    "frequency": "Once",
                    "start_date": Utc::now().date_naive(),
                    "employee_ids": [employee_id],
                    "activate": true
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{created}");
        let schedule_id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, summary) = self
            .request(
                Caller::Admin,
                Method::POST,
                &format!("/api/schedules/{schedule_id}/process"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{summary}");
        assert_eq!(summary["data"]["created"], 1);

        let (_, mine) = self
            .request(Caller::Employee(employee_id), Method::GET, "/api/my/talks", None)
            .await;
        mine["data"]["items"][0]["id"].as_str().unwrap().parse().unwrap()
    }
}

fn version(value: &Value) -> i64 {
    value["data"]["version"].as_i64().unwrap()
}

#[tokio::test]
async fn health_reports_database() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Caller::Anonymous, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["database"], true);
}

#[tokio::test]
async fn admin_routes_require_identity_and_role() {
    let app = TestApp::new().await;

    let (status, _) = app
        .request(Caller::Anonymous, Method::GET, "/api/schedules", None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let employee = app.employee("Sam").await;
    let (status, body) = app
        .request(Caller::Employee(employee.id), Method::GET, "/api/schedules", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, body) = app
        .request(Caller::Admin, Method::GET, "/api/schedules", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn employee_walks_the_full_workflow() {
    let app = TestApp::new().await;
    let employee = app.employee("Ada").await;
    let talk = app.talk("Ladder safety").await;
    let id = app.assign(talk.id, employee.id).await;
    let me = || Caller::Employee(employee.id);

    let (status, detail) = app
        .request(me(), Method::GET, &format!("/api/my/talks/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["data"]["assignment"]["status"], "Pending");
    assert_eq!(detail["data"]["quiz_locked"], true);
    assert_eq!(detail["data"]["questions"].as_array().unwrap().len(), 0);
    let mut current = detail["data"]["assignment"]["version"].as_i64().unwrap();

    let (status, started) = app
        .request(
            me(),
            Method::POST,
            &format!("/api/my/talks/{id}/start"),
            Some(json!({ "expected_version": current })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["data"]["status"], "InProgress");
    current = version(&started);

    // Quiz is gated behind the sections.
    let (status, body) = app
        .request(
            me(),
            Method::POST,
            &format!("/api/my/talks/{id}/quiz"),
            Some(json!({ "expected_version": current, "answers": {} })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("GateNotSatisfied"));

    let sections: Vec<String> = detail["data"]["sections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    for section_id in &sections {
        let (status, acked) = app
            .request(
                me(),
                Method::POST,
                &format!("/api/my/talks/{id}/sections/{section_id}/ack"),
                Some(json!({ "expected_version": current, "time_spent_seconds": 30 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{acked}");
        current = version(&acked);
    }

    let (_, detail) = app
        .request(me(), Method::GET, &format!("/api/my/talks/{id}"), None)
        .await;
    assert_eq!(detail["data"]["quiz_locked"], false);
    assert_eq!(detail["data"]["current_step"], "Quiz");
    let questions = detail["data"]["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 2);
    assert!(questions.iter().all(|q| q.get("correct_option_index").is_none()));

    let mut answers = serde_json::Map::new();
    for question in questions {
        let qid = question["id"].as_str().unwrap().to_string();
        if question["options"].as_array().unwrap().is_empty() {
            answers.insert(qid, json!("True"));
        } else {
            answers.insert(qid, json!(1));
        }
    }
    let (status, graded) = app
        .request(
            me(),
            Method::POST,
            &format!("/api/my/talks/{id}/quiz"),
            Some(json!({ "expected_version": current, "answers": answers })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{graded}");
    assert_eq!(graded["data"]["result"]["passed"], true);
    assert_eq!(graded["data"]["result"]["percentage"], 100);
    current = graded["data"]["scheduled_talk"]["version"].as_i64().unwrap();

    let completion_body = json!({
        "expected_version": current,
        "signed_by_name": "Ada Builder",
        "signature_data": "data:image/png;base64,iVBORw0KGgo=",
        "latitude": 51.5,
        "longitude": -0.12
    });
    let (status, record) = app
        .request(
            me(),
            Method::POST,
            &format!("/api/my/talks/{id}/complete"),
            Some(completion_body.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{record}");
    assert_eq!(record["data"]["quiz_score"], 100);
    assert!(record["data"]["certificate_reference"]
        .as_str()
        .unwrap()
        .starts_with("TT-"));
    assert!(record["data"].get("signature_data").is_none());

    let (status, _) = app
        .request(
            me(),
            Method::POST,
            &format!("/api/my/talks/{id}/complete"),
            Some(completion_body),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, completed) = app
        .request(me(), Method::GET, "/api/my/talks?bucket=completed", None)
        .await;
    assert_eq!(completed["data"]["total"], 1);
}

#[tokio::test]
async fn stale_version_and_bad_input_are_rejected() {
    let app = TestApp::new().await;
    let employee = app.employee("Lin").await;
    let talk = app.talk("Hot work").await;
    let id = app.assign(talk.id, employee.id).await;

    let (status, body) = app
        .request(
            Caller::Employee(employee.id),
            Method::POST,
            &format!("/api/my/talks/{id}/start"),
            Some(json!({ "expected_version": 99 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().starts_with("Conflict"));

    let (status, _) = app
        .request(
            Caller::Employee(employee.id),
            Method::POST,
            &format!("/api/my/talks/{id}/video"),
            Some(json!({ "expected_version": 1, "watch_percent": 150 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn employees_cannot_see_each_others_talks() {
    let app = TestApp::new().await;
    let owner = app.employee("Owner").await;
    let other = app.employee("Other").await;
    let talk = app.talk("Confined spaces").await;
    let id = app.assign(talk.id, owner.id).await;

    let (status, _) = app
        .request(
            Caller::Employee(other.id),
            Method::GET,
            &format!("/api/my/talks/{id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_reminds_and_cancels_scheduled_talks() {
    let app = TestApp::new().await;
    let employee = app.employee("Noor").await;
    let talk = app.talk("Lockout tagout").await;
    let id = app.assign(talk.id, employee.id).await;

    let (status, reminded) = app
        .request(
            Caller::Admin,
            Method::POST,
            &format!("/api/scheduled-talks/{id}/remind"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reminded["data"]["reminder_count"], 1);

    let (status, cancelled) = app
        .request(
            Caller::Admin,
            Method::POST,
            &format!("/api/scheduled-talks/{id}/cancel"),
            Some(json!({ "reason": "left the site" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["data"]["status"], "Cancelled");

    let (status, _) = app
        .request(
            Caller::Admin,
            Method::POST,
            &format!("/api/scheduled-talks/{id}/remind"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, listed) = app
        .request(
            Caller::Admin,
            Method::GET,
            &format!("/api/scheduled-talks?status=Cancelled&employee_id={}", employee.id),
            None,
        )
        .await;
    assert_eq!(listed["data"]["total"], 1);
}

#[tokio::test]
async fn course_assignment_round_trip() {
    let app = TestApp::new().await;
    let employee = app.employee("Kai").await;
    let first = app.talk("Site induction").await;
    let second = app.talk("Fire safety").await;
    let course = ToolboxTalkCourse::create(
        &app.db.pool,
        app.tenant_id,
        "New starter",
        None,
        &[first.id, second.id],
    )
    .await
    .unwrap();

    let (status, preview) = app
        .request(
            Caller::Admin,
            Method::POST,
            &format!("/api/courses/{}/preview", course.id),
            Some(json!({ "employee_ids": [employee.id] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        preview["data"]["employees"][0]["talks"].as_array().unwrap().len(),
        2
    );

    let due = Utc::now() + Duration::days(14);
    let (status, assigned) = app
        .request(
            Caller::Admin,
            Method::POST,
            &format!("/api/courses/{}/assign", course.id),
            Some(json!({ "due_date": due, "employees": [{ "employee_id": employee.id }] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{assigned}");
    assert_eq!(assigned["data"][0]["created_talks"], 2);
    let assignment_id = assigned["data"][0]["course_assignment_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, removed) = app
        .request(
            Caller::Admin,
            Method::DELETE,
            &format!("/api/course-assignments/{assignment_id}/talks/{}", second.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{removed}");
    assert_eq!(removed["data"]["total_talks"], 1);

    let (status, deleted) = app
        .request(
            Caller::Admin,
            Method::DELETE,
            &format!("/api/course-assignments/{assignment_id}?reason=restructured"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["data"]["status"], "Cancelled");

    let (status, _) = app
        .request(
            Caller::Admin,
            Method::DELETE,
            &format!("/api/course-assignments/{assignment_id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn localization_without_providers_is_unavailable() {
    let app = TestApp::new().await;
    let talk = app.talk("Noise exposure").await;

    let (status, body) = app
        .request(
            Caller::Admin,
            Method::POST,
            &format!("/api/toolbox-talks/{}/localization-jobs", talk.id),
            Some(json!({ "languages": ["fr"] })),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .request(
            Caller::Admin,
            Method::GET,
            &format!("/api/localization-jobs/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn localization_job_translates_what_employees_read() {
    let app = TestApp::with_translator().await;
    let employee = app.employee("Ines").await;
    let talk = app.talk("Dust control").await;
    let id = app.assign(talk.id, employee.id).await;

    let (status, started) = app
        .request(
            Caller::Admin,
            Method::POST,
            &format!("/api/toolbox-talks/{}/localization-jobs", talk.id),
            Some(json!({ "languages": ["FR", "de"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{started}");
    let job_id: Uuid = started["data"]["job"]["id"].as_str().unwrap().parse().unwrap();

    app.state.localization().wait(job_id).await;

    let (status, snapshot) = app
        .request(
            Caller::Admin,
            Method::GET,
            &format!("/api/localization-jobs/{job_id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["data"]["job"]["status"], "Completed");
    assert_eq!(snapshot["data"]["overall_percent"], 100);

    let (status, detail) = app
        .request(
            Caller::Employee(employee.id),
            Method::GET,
            &format!("/api/my/talks/{id}?lang=fr"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["data"]["talk"]["title"], "DUST CONTROL");
    assert_eq!(detail["data"]["talk"]["language"], "fr");

    let (status, jobs) = app
        .request(
            Caller::Admin,
            Method::GET,
            &format!("/api/toolbox-talks/{}/localization-jobs?page=1&page_size=5", talk.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs["data"]["total"], 1);
    assert_eq!(jobs["data"]["page_size"], 5);
    assert_eq!(jobs["data"]["items"][0]["id"], job_id.to_string());
}

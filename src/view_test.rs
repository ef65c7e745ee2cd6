use super::*;
use crate::api::{Fingerprint, Snapshot};
use crate::fragment::FragmentSource;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

// =========================================================================
// Components
// =========================================================================

const COMPONENTS: &[(&str, &str)] = &[
    ("home", include_str!("../static/components/home.html")),
    ("tile", include_str!("../static/components/tile.html")),
    ("profile", include_str!("../static/components/profile.html")),
    ("task_page", include_str!("../static/components/task_page.html")),
    ("upload_form", include_str!("../static/components/upload_form.html")),
    ("job_row", include_str!("../static/components/job_row.html")),
    ("job_detail", include_str!("../static/components/job_detail.html")),
    ("admin", include_str!("../static/components/admin.html")),
    ("admin_table", include_str!("../static/components/admin_table.html")),
    ("prompt_row", include_str!("../static/components/prompt_row.html")),
    ("prompt_form", include_str!("../static/components/prompt_form.html")),
    ("prompt_chain_row", include_str!("../static/components/prompt_chain_row.html")),
    ("prompt_chain_form", include_str!("../static/components/prompt_chain_form.html")),
];

struct MemorySource {
    markup: HashMap<String, String>,
    fetches: AtomicUsize,
}

impl MemorySource {
    fn new() -> Self {
        Self::with(&[])
    }

    /// Bundled components with some replaced or (empty markup) removed.
    fn with(overrides: &[(&str, &str)]) -> Self {
        let mut markup: HashMap<String, String> =
            COMPONENTS.iter().map(|(name, markup)| ((*name).to_owned(), (*markup).to_owned())).collect();
        for (name, replacement) in overrides {
            if replacement.is_empty() {
                markup.remove(*name);
            } else {
                markup.insert((*name).to_owned(), (*replacement).to_owned());
            }
        }
        Self { markup, fetches: AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl FragmentSource for MemorySource {
    async fn fetch(&self, name: &str) -> Result<String, FragmentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.markup
            .get(name)
            .cloned()
            .ok_or_else(|| FragmentError::Status { name: name.to_owned(), status: 404 })
    }
}

// =========================================================================
// MockBackend
// =========================================================================

#[derive(Default)]
struct MockBackend {
    profile: Option<Record>,
    lists: Mutex<HashMap<Table, Result<Snapshot, ApiError>>>,
    records: HashMap<(Table, String), Record>,
    list_calls: AtomicUsize,
    writes: Mutex<Vec<(&'static str, Table, Record)>>,
    uploads: Mutex<Vec<(String, Option<String>)>>,
}

impl MockBackend {
    fn set_list(&self, table: Table, result: Result<Snapshot, ApiError>) {
        self.lists.lock().unwrap().insert(table, result);
    }

    fn writes(&self) -> Vec<(&'static str, Table, Record)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    async fn profile(&self) -> Result<Record, ApiError> {
        self.profile.clone().ok_or(ApiError::Response { status: 401, body: String::new() })
    }

    async fn list(&self, table: Table) -> Result<Snapshot, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.lists.lock().unwrap().get(&table).cloned().unwrap_or_else(|| Ok(Snapshot::default()))
    }

    async fn get(&self, table: Table, id: &str) -> Result<Record, ApiError> {
        self.records
            .get(&(table, id.to_owned()))
            .cloned()
            .ok_or(ApiError::Response { status: 404, body: String::new() })
    }

    async fn create(&self, table: Table, record: &Record) -> Result<Record, ApiError> {
        self.writes.lock().unwrap().push(("POST", table, record.clone()));
        Ok(record.clone())
    }

    async fn update(&self, table: Table, _id: &str, record: &Record) -> Result<Record, ApiError> {
        self.writes.lock().unwrap().push(("PUT", table, record.clone()));
        Ok(record.clone())
    }

    async fn upload(&self, upload: DatasetUpload) -> Result<Record, ApiError> {
        self.uploads.lock().unwrap().push((upload.dataset_name, upload.dataset_type));
        Ok([("id", 12)].into_iter().collect())
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn record(value: serde_json::Value) -> Record {
    serde_json::from_value(value).unwrap()
}

fn jobs(values: &[serde_json::Value], checksum: &str) -> Result<Snapshot, ApiError> {
    Ok(Snapshot {
        records: values.iter().cloned().map(record).collect(),
        fingerprint: Some(Fingerprint(checksum.to_owned())),
    })
}

fn context(source: &Arc<MemorySource>, backend: &Arc<MockBackend>, poll_interval: Option<Duration>) -> AppContext {
    AppContext {
        fragments: FragmentCache::new(Arc::clone(source) as Arc<dyn FragmentSource>),
        backend: Arc::clone(backend) as Arc<dyn Backend>,
        poll_interval,
    }
}

fn state(query: &str) -> RouteState {
    RouteState::from_query(query)
}

fn container_of(view: &View, name: &str) -> Element {
    let mut page = view.page().snapshot();
    page.container_mut(name).cloned().unwrap()
}

fn row_texts(view: &View, name: &str, field: &str) -> Vec<String> {
    container_of(view, name)
        .find_all(&|el: &Element| el.attr("data-field") == Some(field))
        .into_iter()
        .map(Element::text)
        .collect()
}

// =========================================================================
// Home
// =========================================================================

#[tokio::test]
async fn home_renders_task_tiles_and_profile() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend {
        profile: Some(record(json!({ "username": "ada", "credits": 42 }))),
        ..MockBackend::default()
    });
    let view = dispatch(&context(&source, &backend, None), &state("")).await.unwrap();

    assert_eq!(view.route(), &Route::Home);
    let tiles = container_of(&view, "tiles");
    let links: Vec<&str> = tiles.child_elements().filter_map(|tile| tile.attr("href")).collect();
    assert_eq!(links, vec!["?route=adwords", "?route=public_data", "?route=social_media", "?route=survey"]);
    let first = tiles.child_elements().next().unwrap();
    let img = first.find(&|el: &Element| el.tag == "img").unwrap();
    assert_eq!(img.attr("src"), Some("/static/images/icons/ad_analysis.jpg"));

    let profile = container_of(&view, "profile");
    assert_eq!(profile.text().split_whitespace().collect::<Vec<_>>(), vec!["ada", "42"]);
    assert!(!view.is_polling());
}

#[tokio::test]
async fn home_without_profile_renders_anonymously() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let view = dispatch(&context(&source, &backend, None), &state("?route=home")).await.unwrap();

    assert!(container_of(&view, "profile").child_elements().next().is_none());
    assert_eq!(container_of(&view, "tiles").child_elements().count(), 4);
}

#[tokio::test]
async fn missing_container_aborts_setup() {
    let source = Arc::new(MemorySource::with(&[("home", "<main><section data-container=\"profile\"></section></main>")]));
    let backend = Arc::new(MockBackend::default());
    let err = dispatch(&context(&source, &backend, None), &state("")).await.err().unwrap();

    assert!(matches!(err, ViewError::MissingContainer { ref container, .. } if container == "tiles"));
}

// =========================================================================
// Task pages
// =========================================================================

#[tokio::test]
async fn task_page_renders_upload_form_and_job_table() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    backend.set_list(
        Table::Job,
        jobs(
            &[
                json!({ "id": 2, "dataset_name": "spring", "status": 3 }),
                json!({ "id": 1, "dataset_name": "winter", "status": 77 }),
            ],
            "c1",
        ),
    );
    let view = dispatch(&context(&source, &backend, None), &state("?route=survey")).await.unwrap();

    let html = view.html();
    assert!(html.contains("<h1 data-field=\"title\">Survey Analysis</h1>"), "{html}");

    let upload = container_of(&view, "upload");
    let kind = upload.find(&|el: &Element| el.attr("data-field") == Some("dataset_type")).unwrap();
    assert_eq!(kind.attr("value"), Some("survey"));

    let rows = container_of(&view, "jobs");
    let header = rows.child_elements().next().unwrap();
    assert!(header.has_class("header"));
    assert_eq!(header.child_elements().next().map(Element::text).as_deref(), Some("#"));
    assert_eq!(row_texts(&view, "jobs", "dataset_name"), vec!["spring", "winter"]);
    assert_eq!(row_texts(&view, "jobs", "status"), vec!["Complete", "77"]);
}

#[tokio::test(start_paused = true)]
async fn task_page_polls_job_list_on_checksum_change() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    backend.set_list(Table::Job, jobs(&[json!({ "id": 1, "dataset_name": "a" })], "c1"));
    let ctx = context(&source, &backend, Some(Duration::from_secs(1)));
    let view = dispatch(&ctx, &state("?route=adwords")).await.unwrap();
    assert!(view.is_polling());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let settled = view.page().revision();
    assert_eq!(row_texts(&view, "jobs", "dataset_name"), vec!["a"]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(view.page().revision(), settled, "unchanged checksum must not re-render");

    backend.set_list(
        Table::Job,
        jobs(&[json!({ "id": 1, "dataset_name": "a" }), json!({ "id": 2, "dataset_name": "b" })], "c2"),
    );
    let changes = view.page().subscribe();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(changes.has_changed().unwrap());
    assert_eq!(row_texts(&view, "jobs", "dataset_name"), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn poll_failure_is_shown_then_cleared() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    backend.set_list(Table::Job, jobs(&[json!({ "id": 1, "dataset_name": "a" })], "c1"));
    let ctx = context(&source, &backend, Some(Duration::from_secs(1)));
    let view = dispatch(&ctx, &state("?route=admin")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    backend.set_list(Table::Job, Err(ApiError::Response { status: 502, body: String::new() }));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(container_of(&view, "error").text(), "API response error: status 502");
    assert_eq!(row_texts(&view, "jobs", "dataset_name"), vec!["a"]);

    backend.set_list(Table::Job, jobs(&[json!({ "id": 3, "dataset_name": "c" })], "c3"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(container_of(&view, "error").text(), "");
    assert_eq!(row_texts(&view, "jobs", "dataset_name"), vec!["c"]);
}

#[tokio::test(start_paused = true)]
async fn poll_failure_clears_when_backend_recovers_unchanged() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    backend.set_list(Table::Job, jobs(&[json!({ "id": 1, "dataset_name": "a" })], "c1"));
    let ctx = context(&source, &backend, Some(Duration::from_secs(1)));
    let view = dispatch(&ctx, &state("?route=admin")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    backend.set_list(Table::Job, Err(ApiError::Response { status: 502, body: String::new() }));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(container_of(&view, "error").text(), "API response error: status 502");

    backend.set_list(Table::Job, jobs(&[json!({ "id": 1, "dataset_name": "a" })], "c1"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(container_of(&view, "error").text(), "");
    assert_eq!(row_texts(&view, "jobs", "dataset_name"), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn stopping_a_view_ends_polling() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let ctx = context(&source, &backend, Some(Duration::from_secs(1)));
    let mut view = dispatch(&ctx, &state("?route=admin")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    view.stop();
    let calls = backend.list_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(!view.is_polling());
    assert_eq!(backend.list_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn upload_validates_dataset_name_then_refreshes_jobs() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let view = dispatch(&context(&source, &backend, None), &state("?route=public_data")).await.unwrap();
    let upload = |name: &str| DatasetUpload {
        dataset_name: name.to_owned(),
        dataset_type: None,
        file_name: "d.csv".into(),
        bytes: b"a,b\n".to_vec(),
    };

    let err = view.upload(upload("ab")).await.unwrap_err();
    assert_eq!(err.to_string(), "Dataset name must be at least 3 characters");
    assert!(backend.uploads.lock().unwrap().is_empty());

    let before = backend.list_calls.load(Ordering::SeqCst);
    let saved = view.upload(upload("march")).await.unwrap();
    assert_eq!(saved.id().as_deref(), Some("12"));
    assert_eq!(*backend.uploads.lock().unwrap(), vec![("march".to_owned(), Some("public_data".to_owned()))]);
    assert_eq!(backend.list_calls.load(Ordering::SeqCst), before + 1);
}

// =========================================================================
// Job detail
// =========================================================================

#[tokio::test]
async fn job_detail_requires_job_id_before_fetching() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let err = dispatch(&context(&source, &backend, None), &state("?route=adwords_task")).await.err().unwrap();

    assert!(matches!(err, ViewError::MissingParameter { param: "job", .. }));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn job_detail_binds_job_with_sanitized_result() {
    let source = Arc::new(MemorySource::new());
    let mut records = HashMap::new();
    records.insert(
        (Table::Job, "7".to_owned()),
        record(json!({
            "id": 7, "dataset_name": "q3", "status": 92,
            "result": "<p>Top keyword: <b>shoes</b></p><script>steal()</script>"
        })),
    );
    let backend = Arc::new(MockBackend { records, ..MockBackend::default() });
    let view = dispatch(&context(&source, &backend, None), &state("?route=adwords_task&job_id=7")).await.unwrap();

    let html = view.html();
    assert!(html.contains("<span class=\"status\" data-field=\"status\" data-bind=\"status\" style=\"color: red\">Error</span>"), "{html}");
    assert!(html.contains("<b>shoes</b>"));
    assert!(!html.contains("<script"));
    assert!(!html.contains("steal"));
}

#[tokio::test]
async fn job_detail_links_back_to_its_task_page() {
    let source = Arc::new(MemorySource::new());
    let mut records = HashMap::new();
    records.insert((Table::Job, "7".to_owned()), record(json!({ "id": 7, "dataset_type": "survey" })));
    records.insert((Table::Job, "8".to_owned()), record(json!({ "id": 8, "dataset_type": "admin" })));
    let backend = Arc::new(MockBackend { records, ..MockBackend::default() });
    let ctx = context(&source, &backend, None);
    let back = |view: &View| {
        let page = view.page().snapshot();
        page.find(&|el: &Element| el.has_class("back")).and_then(|a| a.attr("href")).map(str::to_owned)
    };

    let survey = dispatch(&ctx, &state("?route=adwords_task&job_id=7")).await.unwrap();
    assert_eq!(back(&survey).as_deref(), Some("?route=survey"));

    let other = dispatch(&ctx, &state("?route=adwords_task&job_id=8")).await.unwrap();
    assert_eq!(back(&other).as_deref(), Some("?route=adwords"));
}

// =========================================================================
// Admin tables
// =========================================================================

#[tokio::test]
async fn admin_prompt_table_has_header_and_no_poller() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    backend.set_list(Table::Prompt, jobs(&[json!({ "id": 1, "title": "Summary", "body": "Sum it up" })], "p1"));
    let view = dispatch(&context(&source, &backend, Some(Duration::from_secs(1))), &state("?route=admin/prompt"))
        .await
        .unwrap();

    assert!(!view.is_polling());
    let header: Vec<String> = container_of(&view, "rows").child_elements().next().unwrap().child_elements().map(Element::text).collect();
    assert_eq!(header, vec!["#", "Title", "Body", "Updated"]);
    assert_eq!(row_texts(&view, "rows", "title"), vec!["Summary"]);
}

#[tokio::test]
async fn editing_a_prompt_puts_it_and_refreshes_the_table() {
    let source = Arc::new(MemorySource::new());
    let mut records = HashMap::new();
    records.insert((Table::Prompt, "1".to_owned()), record(json!({ "id": 1, "title": "Summary", "body": "Sum it up nicely" })));
    let backend = Arc::new(MockBackend { records, ..MockBackend::default() });
    backend.set_list(Table::Prompt, jobs(&[json!({ "id": 1, "title": "Summary" })], "p1"));
    let mut view = dispatch(&context(&source, &backend, None), &state("?route=admin/prompt")).await.unwrap();

    view.open_edit("1").await.unwrap();
    assert!(container_of(&view, "dialog").find(&|el: &Element| el.tag == "form").is_some());

    view.set_value("title", "Short summary").unwrap();
    backend.set_list(Table::Prompt, jobs(&[json!({ "id": 1, "title": "Short summary" })], "p2"));
    view.submit().await.unwrap();

    let writes = backend.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "PUT");
    assert_eq!(writes[0].1, Table::Prompt);
    assert_eq!(writes[0].2.display("title").as_deref(), Some("Short summary"));
    assert!(container_of(&view, "dialog").child_elements().next().is_none());
    assert_eq!(row_texts(&view, "rows", "title"), vec!["Short summary"]);
}

#[tokio::test]
async fn invalid_prompt_chain_is_not_submitted() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let mut view = dispatch(&context(&source, &backend, None), &state("?route=admin/prompt_chain")).await.unwrap();

    view.open_new().unwrap();
    view.set_value("title", "ab").unwrap();
    view.set_value("prompt_ids", "1,2").unwrap();
    let err = view.submit().await.unwrap_err();

    assert!(matches!(err, ViewError::Form(FormError::Invalid(ref errors)) if errors.len() == 1));
    assert!(backend.writes().is_empty());
    assert!(view.dialog().is_some_and(FormDialog::is_open));
}

#[tokio::test]
async fn views_without_dialog_reject_form_actions() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let mut view = dispatch(&context(&source, &backend, None), &state("?route=admin")).await.unwrap();

    assert!(matches!(view.open_new(), Err(ViewError::Unsupported { action: "forms", .. })));
}

// =========================================================================
// Failures and not found
// =========================================================================

#[tokio::test]
async fn fragment_failure_aborts_before_backend_calls() {
    let source = Arc::new(MemorySource::with(&[("job_row", "")]));
    let backend = Arc::new(MockBackend::default());
    let err = dispatch(&context(&source, &backend, None), &state("?route=admin")).await.err().unwrap();

    assert!(matches!(err, ViewError::Fragment(FragmentError::Status { status: 404, .. })));
    assert_eq!(backend.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_route_renders_not_found_without_fetching() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let view = dispatch(&context(&source, &backend, None), &state("?route=<b>x</b>")).await.unwrap();

    assert_eq!(view.route(), &Route::NotFound("<b>x</b>".into()));
    let html = view.html();
    assert!(html.contains("Page not found"));
    assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fragments_are_shared_across_dispatches() {
    let source = Arc::new(MemorySource::new());
    let backend = Arc::new(MockBackend::default());
    let ctx = context(&source, &backend, None);
    dispatch(&ctx, &state("?route=adwords")).await.unwrap();
    dispatch(&ctx, &state("?route=survey")).await.unwrap();

    assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
}

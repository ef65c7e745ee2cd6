//! Route dispatch and view setup.
//!
//! DESIGN
//! ======
//! `dispatch` resolves every fragment a route needs through the shared
//! [`FragmentCache`], builds the page once the whole set is available, and
//! for polled list views starts a poll loop that re-renders the list in
//! place. The page lives behind a mutex shared with the poller; every change
//! bumps a revision on a `watch` channel so a front end can re-emit it.
//!
//! ERROR HANDLING
//! ==============
//! A fragment failure aborts setup before anything is rendered. Backend
//! failures during setup abort too; failures inside the poll loop are shown
//! in the page's `error` container and cleared by the next good response.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Backend, DatasetUpload, Table};
use crate::binder;
use crate::form::{self, FormDialog, FormError, LengthRule};
use crate::fragment::{Fragment, FragmentCache, FragmentError};
use crate::list::{self, Header};
use crate::markup::Element;
use crate::poll::{self, PollHandle, PollUpdate, RefreshMode};
use crate::record::Record;
use crate::route::{Route, RouteState};

const ERROR_CONTAINER: &str = "error";
const DIALOG_CONTAINER: &str = "dialog";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Form(#[from] FormError),

    /// A page fragment lacks a `data-container` the route fills.
    #[error("fragment `{fragment}` has no `{container}` container")]
    MissingContainer { fragment: String, container: String },

    /// A route parameter the view needs is absent.
    #[error("route `{route}` requires a `{param}` parameter")]
    MissingParameter { route: String, param: &'static str },

    /// The view has no dialog or upload form for this action.
    #[error("route `{route}` does not support {action}")]
    Unsupported { route: String, action: &'static str },
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Collaborators shared by every view.
#[derive(Clone)]
pub struct AppContext {
    pub fragments: FragmentCache,
    pub backend: Arc<dyn Backend>,
    /// `None` renders list views once without polling.
    pub poll_interval: Option<Duration>,
}

// =============================================================================
// PAGE
// =============================================================================

/// Rendered page shared between a view and its poller.
pub struct Page {
    root: Mutex<Element>,
    revision: watch::Sender<u64>,
}

impl Page {
    fn new(root: Element) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        Arc::new(Self { root: Mutex::new(root), revision })
    }

    #[must_use]
    pub fn html(&self) -> String {
        self.lock().to_html()
    }

    /// Copy of the current element tree.
    #[must_use]
    pub fn snapshot(&self) -> Element {
        self.lock().clone()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver notified after every change to the page.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Element) -> R) -> R {
        let out = {
            let mut root = self.lock();
            f(&mut root)
        };
        self.revision.send_modify(|rev| *rev += 1);
        out
    }

    fn lock(&self) -> MutexGuard<'_, Element> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn container<'a>(root: &'a mut Element, fragment: &str, name: &str) -> Result<&'a mut Element, ViewError> {
    root.container_mut(name).ok_or_else(|| ViewError::MissingContainer {
        fragment: fragment.to_owned(),
        container: name.to_owned(),
    })
}

fn set_error(root: &mut Element, message: Option<&str>) {
    if let Some(slot) = root.container_mut(ERROR_CONTAINER) {
        match message {
            Some(message) => slot.set_text(message),
            None => slot.clear(),
        }
    }
}

// =============================================================================
// LIST BINDING
// =============================================================================

/// A table rendered into a page container.
#[derive(Clone)]
struct ListBinding {
    table: Table,
    fragment: Fragment,
    container: &'static str,
    header: Header,
}

impl ListBinding {
    fn render_into(&self, root: &mut Element, records: &[Record]) {
        match root.container_mut(self.container) {
            Some(slot) => list::render(slot, &self.fragment, records, self.header),
            None => warn!(container = self.container, "list container vanished from page"),
        }
    }

    fn apply(&self, page: &Page, update: PollUpdate) {
        match update {
            PollUpdate::Changed(records) => {
                debug!(table = %self.table, count = records.len(), "re-rendering list");
                page.update(|root| {
                    set_error(root, None);
                    self.render_into(root, &records);
                });
            }
            PollUpdate::Failed(e) => page.update(|root| set_error(root, Some(&e.to_string()))),
        }
    }
}

fn start_list_poll(ctx: &AppContext, page: &Arc<Page>, binding: &ListBinding) -> Option<PollHandle> {
    let interval = ctx.poll_interval?;
    let backend = Arc::clone(&ctx.backend);
    let table = binding.table;
    let fetch = move || {
        let backend = Arc::clone(&backend);
        async move { backend.list(table).await }
    };
    let page = Arc::clone(page);
    let binding = binding.clone();
    Some(poll::start_polling(fetch, interval, RefreshMode::OnChange, move |update| binding.apply(&page, update)))
}

// =============================================================================
// VIEW
// =============================================================================

/// A dispatched route: its page plus whatever keeps it live.
pub struct View {
    route: Route,
    page: Arc<Page>,
    backend: Arc<dyn Backend>,
    list: Option<ListBinding>,
    dialog: Option<FormDialog>,
    upload_rules: Option<Vec<LengthRule>>,
    poll: Option<PollHandle>,
}

/// Optional parts a route setup hands to [`finish`].
#[derive(Default)]
struct Parts {
    list: Option<ListBinding>,
    polled: bool,
    dialog: Option<FormDialog>,
    upload_rules: Option<Vec<LengthRule>>,
}

impl View {
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    #[must_use]
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    #[must_use]
    pub fn html(&self) -> String {
        self.page.html()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poll.as_ref().is_some_and(|poll| !poll.is_stopped())
    }

    /// Stop the poll loop, if any.
    pub fn stop(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.stop();
        }
    }

    /// Re-fetch and re-render the view's list.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the page keeps its previous list.
    pub async fn refresh(&self) -> Result<(), ViewError> {
        let Some(list) = &self.list else {
            return Ok(());
        };
        let snapshot = self.backend.list(list.table).await?;
        self.page.update(|root| {
            set_error(root, None);
            list.render_into(root, &snapshot.records);
        });
        Ok(())
    }

    #[must_use]
    pub fn dialog(&self) -> Option<&FormDialog> {
        self.dialog.as_ref()
    }

    /// Open the dialog for a new record.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Unsupported`] when the view has no dialog.
    pub fn open_new(&mut self) -> Result<(), ViewError> {
        self.dialog_mut()?.open_new();
        self.show_dialog();
        Ok(())
    }

    /// Fetch record `id` and open the dialog populated with it.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Unsupported`] without a dialog, or the backend error.
    pub async fn open_edit(&mut self, id: &str) -> Result<(), ViewError> {
        let table = self.dialog_mut()?.table();
        let record = self.backend.get(table, id).await?;
        self.dialog_mut()?.open_edit(&record);
        self.show_dialog();
        Ok(())
    }

    /// Set one field of the open dialog.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Unsupported`] when the view has no dialog.
    pub fn set_value(&mut self, field: &str, value: impl Into<serde_json::Value>) -> Result<bool, ViewError> {
        let set = self.dialog_mut()?.set_value(field, value);
        self.show_dialog();
        Ok(set)
    }

    /// Submit the dialog; on success close it and refresh the list.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Form`] for validation or backend failures; the
    /// dialog stays open in that case.
    pub async fn submit(&mut self) -> Result<Record, ViewError> {
        let Some(dialog) = self.dialog.as_mut() else {
            return Err(unsupported(&self.route, "forms"));
        };
        let saved = dialog.submit(self.backend.as_ref()).await?;
        self.show_dialog();
        self.refresh().await?;
        Ok(saved)
    }

    /// Validate the dataset name against the upload form, upload it tagged
    /// with this view's task route, then refresh the job list.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Unsupported`] on views without an upload form,
    /// [`ViewError::Form`] when validation fails, or the backend error.
    pub async fn upload(&self, mut upload: DatasetUpload) -> Result<Record, ViewError> {
        let Some(rules) = &self.upload_rules else {
            return Err(unsupported(&self.route, "uploads"));
        };
        let fields: Record = [("dataset_name", upload.dataset_name.clone())].into_iter().collect();
        let errors = form::validate(&fields, rules);
        if !errors.is_empty() {
            return Err(FormError::Invalid(errors).into());
        }
        upload.dataset_type = Some(self.route.as_str().to_owned());
        info!(route = self.route.as_str(), dataset = %upload.dataset_name, "uploading dataset");
        let saved = self.backend.upload(upload).await?;
        self.refresh().await?;
        Ok(saved)
    }

    fn dialog_mut(&mut self) -> Result<&mut FormDialog, ViewError> {
        match self.dialog.as_mut() {
            Some(dialog) => Ok(dialog),
            None => Err(unsupported(&self.route, "forms")),
        }
    }

    fn show_dialog(&self) {
        let form = self.dialog.as_ref().and_then(FormDialog::form).cloned();
        self.page.update(|root| {
            if let Some(slot) = root.container_mut(DIALOG_CONTAINER) {
                slot.clear();
                if let Some(form) = form {
                    slot.append(form);
                }
            }
        });
    }
}

fn unsupported(route: &Route, action: &'static str) -> ViewError {
    ViewError::Unsupported { route: route.as_str().to_owned(), action }
}

/// Render the initial list, wrap the page and start polling when asked.
async fn finish(ctx: &AppContext, route: Route, page_name: &str, mut root: Element, parts: Parts) -> Result<View, ViewError> {
    if let Some(list) = &parts.list {
        let slot = container(&mut root, page_name, list.container)?;
        let snapshot = ctx.backend.list(list.table).await?;
        list::render(slot, &list.fragment, &snapshot.records, list.header);
    }
    if parts.dialog.is_some() {
        container(&mut root, page_name, DIALOG_CONTAINER)?;
    }

    let page = Page::new(root);
    let poll = match &parts.list {
        Some(list) if parts.polled => start_list_poll(ctx, &page, list),
        _ => None,
    };
    Ok(View {
        route,
        page,
        backend: Arc::clone(&ctx.backend),
        list: parts.list,
        dialog: parts.dialog,
        upload_rules: parts.upload_rules,
        poll,
    })
}

// =============================================================================
// DISPATCH
// =============================================================================

struct Tile {
    route: Route,
    title: &'static str,
    description: &'static str,
    image_url: &'static str,
}

impl Tile {
    fn record(&self) -> Record {
        [
            ("title", self.title.to_owned()),
            ("description", self.description.to_owned()),
            ("image_url", self.image_url.to_owned()),
            ("link", self.route.href()),
        ]
        .into_iter()
        .collect()
    }
}

static TASK_TILES: [Tile; 4] = [
    Tile {
        route: Route::Adwords,
        title: "Ad Analysis",
        description: "Upload ad campaign exports for keyword and spend analysis.",
        image_url: "/static/images/icons/ad_analysis.jpg",
    },
    Tile {
        route: Route::PublicData,
        title: "Public Data Analysis",
        description: "Analyze public datasets.",
        image_url: "/static/images/icons/public_data_analysis.jpg",
    },
    Tile {
        route: Route::SocialMedia,
        title: "Social Media Analysis",
        description: "Analyze social media exports.",
        image_url: "/static/images/icons/social_media_analysis.jpg",
    },
    Tile {
        route: Route::Survey,
        title: "Survey Analysis",
        description: "Summarize survey responses.",
        image_url: "/static/images/icons/survey_analysis.jpg",
    },
];

static ADMIN_TILES: [Tile; 2] = [
    Tile {
        route: Route::AdminPrompt,
        title: "Prompts",
        description: "Edit analysis prompts.",
        image_url: "/static/images/icons/prompts.jpg",
    },
    Tile {
        route: Route::AdminPromptChain,
        title: "Prompt Chains",
        description: "Edit prompt chains.",
        image_url: "/static/images/icons/prompt_chains.jpg",
    },
];

fn tile_records(tiles: &[Tile]) -> Vec<Record> {
    tiles.iter().map(Tile::record).collect()
}

fn job_list(fragment: &Fragment) -> ListBinding {
    ListBinding { table: Table::Job, fragment: fragment.clone(), container: "jobs", header: Header::Columns }
}

/// Build the view for `state`.
///
/// # Errors
///
/// Returns the first fragment, backend or page-structure failure; nothing is
/// rendered or polled in that case.
pub async fn dispatch(ctx: &AppContext, state: &RouteState) -> Result<View, ViewError> {
    info!(route = state.route.as_str(), "dispatching route");
    match &state.route {
        Route::Home => home(ctx).await,
        route @ (Route::Adwords | Route::PublicData | Route::SocialMedia | Route::Survey) => task_page(ctx, route).await,
        Route::AdwordsTask => job_detail(ctx, state.job_id.as_deref()).await,
        Route::Admin => admin(ctx).await,
        Route::AdminPrompt => admin_table(ctx, Route::AdminPrompt, Table::Prompt, "Prompts").await,
        Route::AdminPromptChain => admin_table(ctx, Route::AdminPromptChain, Table::PromptChain, "Prompt Chains").await,
        Route::NotFound(raw) => Ok(not_found(ctx, raw)),
    }
}

async fn home(ctx: &AppContext) -> Result<View, ViewError> {
    let set = ctx.fragments.resolve(&["home", "tile", "profile"]).await?;
    let mut root = set.instantiate("home")?;
    list::render(container(&mut root, "home", "tiles")?, set.get("tile")?, &tile_records(&TASK_TILES), Header::None);

    match ctx.backend.profile().await {
        Ok(profile) => {
            let mut header = set.instantiate("profile")?;
            binder::bind(&mut header, &profile);
            let slot = container(&mut root, "home", "profile")?;
            slot.clear();
            slot.append(header);
        }
        Err(e) => debug!(error = %e, "no profile, rendering anonymous home"),
    }
    finish(ctx, Route::Home, "home", root, Parts::default()).await
}

async fn task_page(ctx: &AppContext, route: &Route) -> Result<View, ViewError> {
    let Some(tile) = TASK_TILES.iter().find(|tile| &tile.route == route) else {
        return Ok(not_found(ctx, route.as_str()));
    };
    let set = ctx.fragments.resolve(&["task_page", "upload_form", "job_row"]).await?;
    let mut root = set.instantiate("task_page")?;
    binder::bind(&mut root, &tile.record());

    let mut upload = set.instantiate("upload_form")?;
    binder::bind(&mut upload, &[("dataset_type", route.as_str())].into_iter().collect());
    let upload_rules = form::rules(&upload);
    let slot = container(&mut root, "task_page", "upload")?;
    slot.clear();
    slot.append(upload);

    let parts = Parts {
        list: Some(job_list(set.get("job_row")?)),
        polled: true,
        upload_rules: Some(upload_rules),
        ..Parts::default()
    };
    finish(ctx, route.clone(), "task_page", root, parts).await
}

async fn job_detail(ctx: &AppContext, job_id: Option<&str>) -> Result<View, ViewError> {
    let id = job_id.ok_or_else(|| ViewError::MissingParameter {
        route: Route::AdwordsTask.as_str().to_owned(),
        param: "job",
    })?;
    let set = ctx.fragments.resolve(&["job_detail"]).await?;
    let mut root = set.instantiate("job_detail")?;
    let job = ctx.backend.get(Table::Job, id).await?;
    binder::bind(&mut root, &job);
    binder::bind(&mut root, &[("back", back_route(&job).href())].into_iter().collect());
    finish(ctx, Route::AdwordsTask, "job_detail", root, Parts::default()).await
}

/// Task page a job was uploaded from, defaulting to ad analysis.
fn back_route(job: &Record) -> Route {
    job.display("dataset_type")
        .map(|raw| Route::parse(&raw))
        .filter(|route| TASK_TILES.iter().any(|tile| &tile.route == route))
        .unwrap_or(Route::Adwords)
}

async fn admin(ctx: &AppContext) -> Result<View, ViewError> {
    let set = ctx.fragments.resolve(&["admin", "tile", "job_row"]).await?;
    let mut root = set.instantiate("admin")?;
    list::render(container(&mut root, "admin", "tiles")?, set.get("tile")?, &tile_records(&ADMIN_TILES), Header::None);

    let parts = Parts { list: Some(job_list(set.get("job_row")?)), polled: true, ..Parts::default() };
    finish(ctx, Route::Admin, "admin", root, parts).await
}

async fn admin_table(ctx: &AppContext, route: Route, table: Table, title: &str) -> Result<View, ViewError> {
    let row = format!("{table}_row");
    let form_name = format!("{table}_form");
    let set = ctx.fragments.resolve(&["admin_table", row.as_str(), form_name.as_str()]).await?;
    let mut root = set.instantiate("admin_table")?;
    binder::bind(&mut root, &[("title", title)].into_iter().collect());

    let parts = Parts {
        list: Some(ListBinding { table, fragment: set.get(&row)?.clone(), container: "rows", header: Header::Columns }),
        dialog: Some(FormDialog::new(table, set.get(&form_name)?)),
        ..Parts::default()
    };
    finish(ctx, route, "admin_table", root, parts).await
}

/// Explicit not-found page; fetches nothing.
fn not_found(ctx: &AppContext, raw: &str) -> View {
    warn!(route = raw, "unknown route");
    let root = Element::new("main")
        .with_attr("class", "notFound")
        .with_child(Element::new("h1").with_text("Page not found"))
        .with_child(Element::new("p").with_text(format!("There is no page named \"{raw}\".")))
        .with_child(Element::new("a").with_attr("href", Route::Home.href()).with_text("Back to home"));
    View {
        route: Route::NotFound(raw.to_owned()),
        page: Page::new(root),
        backend: Arc::clone(&ctx.backend),
        list: None,
        dialog: None,
        upload_rules: None,
        poll: None,
    }
}

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;

mod metrics;
mod models;

use anyhow::Result;
use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use common::config::Config;
use common::db::AsyncDb;
use common::entries::EntryStore;
use common::error::{TimelineError, TimelineResult};
use common::glossary::BodySegment;
use common::leaderboard::{DateRange, LeaderboardRequest, LeaderboardSort};
use common::preferences::Preferences;
use common::query::{build_query, FilterSelection, RawFilterParams};
use common::types::{format_usd, EntryId, FilterKind, SortDirection};
use metrics_exporter_prometheus::PrometheusHandle;
use models::{
    filter_groups, next_linear_url, next_page_url, query_string, EntryView, FilterGroup,
    LeaderboardView,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub store: EntryStore,
    pub config: Config,
    pub prometheus: PrometheusHandle,
}

// --- Templates ---

#[derive(Template)]
#[template(path = "timeline.html")]
struct TimelineTemplate {
    prefs: Preferences,
    grift_total: String,
    groups: Vec<FilterGroup>,
    starred: bool,
    sort: &'static str,
    collection: Option<String>,
    entries: Vec<EntryView>,
    next_url: Option<String>,
}

#[derive(Template)]
#[template(path = "partials/entries.html")]
struct EntriesPartialTemplate {
    entries: Vec<EntryView>,
    next_url: Option<String>,
}

#[derive(Template)]
#[template(path = "partials/scroll_error.html")]
struct ScrollErrorTemplate {
    message: String,
    retry_url: Option<String>,
}

#[derive(Template)]
#[template(path = "all.html")]
struct AllTemplate {
    prefs: Preferences,
    dir: &'static str,
    entries: Vec<EntryView>,
    next_url: Option<String>,
}

#[derive(Template)]
#[template(path = "entry.html")]
struct EntryTemplate {
    prefs: Preferences,
    item: EntryView,
}

#[derive(Template)]
#[template(path = "leaderboard.html")]
struct LeaderboardTemplate {
    prefs: Preferences,
    board: LeaderboardView,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    prefs: Preferences,
    heading: &'static str,
    message: String,
}

fn render<T: Template>(template: &T) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "template render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- Errors ---

fn status_for(err: &TimelineError) -> StatusCode {
    match err {
        TimelineError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        TimelineError::NotFound(_) => StatusCode::NOT_FOUND,
        TimelineError::TransientFetch(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn log_error(err: &TimelineError) {
    match err {
        TimelineError::TransientFetch(msg) => tracing::error!(error = %msg, "fetch failed"),
        other => tracing::debug!(error = %other, "request rejected"),
    }
}

/// HTML error page in the reader's preferred theme.
struct PageError {
    err: TimelineError,
    prefs: Preferences,
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        log_error(&self.err);
        let heading = match self.err {
            TimelineError::InvalidQuery(_) => "Bad request",
            TimelineError::NotFound(_) => "Not found",
            TimelineError::TransientFetch(_) => "Temporarily unavailable",
        };
        let message = match &self.err {
            TimelineError::TransientFetch(_) => {
                "The timeline could not be loaded. Try again shortly.".to_string()
            }
            other => other.to_string(),
        };
        let body = render(&ErrorTemplate {
            prefs: self.prefs,
            heading,
            message,
        });
        (status_for(&self.err), body).into_response()
    }
}

/// JSON error body: `{"error": "<code>", "message": "..."}`.
struct ApiError(TimelineError);

impl From<TimelineError> for ApiError {
    fn from(err: TimelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log_error(&self.0);
        let body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status_for(&self.0), Json(body)).into_response()
    }
}

// --- Request parameters ---

fn prefs_from(headers: &HeaderMap) -> Preferences {
    Preferences::from_cookie_header(
        headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok()),
    )
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers.get("HX-Request").is_some()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_cursor(raw: Option<&str>) -> TimelineResult<Option<EntryId>> {
    non_blank(raw).map(str::parse).transpose()
}

#[derive(Debug, Default, Deserialize)]
struct TimelineParams {
    /// `kind:value` from the combined filter select; `starred:true` included.
    filter: Option<String>,
    theme: Option<String>,
    tech: Option<String>,
    blockchain: Option<String>,
    starred: Option<String>,
    collection: Option<String>,
    sort: Option<String>,
    cursor: Option<String>,
    page_size: Option<usize>,
}

impl TimelineParams {
    fn selection(&self) -> TimelineResult<FilterSelection> {
        let mut raw = RawFilterParams {
            theme: self.theme.clone(),
            tech: self.tech.clone(),
            blockchain: self.blockchain.clone(),
            starred: self.starred.clone(),
            collection: self.collection.clone(),
            sort: self.sort.clone(),
        };
        if let Some(filter) = non_blank(self.filter.as_deref()) {
            let (kind, value) = filter.split_once(':').ok_or_else(|| {
                TimelineError::invalid(format!("filter must be kind:value, got {filter:?}"))
            })?;
            // Starred sits in the same select as the categories so the form
            // can only ever carry one of them.
            let slot = match kind {
                "starred" => &mut raw.starred,
                other => match other.parse::<FilterKind>()? {
                    FilterKind::Theme => &mut raw.theme,
                    FilterKind::Tech => &mut raw.tech,
                    FilterKind::Blockchain => &mut raw.blockchain,
                },
            };
            *slot = Some(value.to_string());
        }
        FilterSelection::from_params(&raw)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LinearParams {
    dir: Option<String>,
    cursor: Option<String>,
}

impl LinearParams {
    fn direction(&self) -> TimelineResult<SortDirection> {
        non_blank(self.dir.as_deref()).map_or(Ok(SortDirection::Desc), str::parse)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LeaderboardParams {
    range: Option<String>,
    sort: Option<String>,
    dir: Option<String>,
    page: Option<String>,
    page_size: Option<usize>,
}

impl LeaderboardParams {
    fn request(&self, config: &Config) -> TimelineResult<LeaderboardRequest> {
        let page = match non_blank(self.page.as_deref()) {
            Some(p) => p.parse::<usize>().map_err(|_parse_err| {
                TimelineError::invalid(format!("page must be a positive integer, got {p:?}"))
            })?,
            None => 1,
        };
        Ok(LeaderboardRequest {
            date_range: self.range.as_deref().unwrap_or("all").parse::<DateRange>()?,
            sort_by: non_blank(self.sort.as_deref())
                .map_or(Ok(LeaderboardSort::default()), str::parse)?,
            sort_dir: non_blank(self.dir.as_deref()).map_or(Ok(SortDirection::Desc), str::parse)?,
            page,
            page_size: self
                .page_size
                .unwrap_or(config.leaderboard.page_size)
                .min(config.pagination.max_page_size),
        })
    }
}

// --- Handlers ---

async fn index(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<TimelineParams>,
) -> Result<Response, PageError> {
    let prefs = prefs_from(&headers);
    let page_err = move |err| PageError { err, prefs };

    let selection = params.selection().map_err(page_err)?;
    let query = build_query(&selection).map_err(page_err)?;
    let store = &state.store;
    let (page, glossary, metadata, values) = tokio::try_join!(
        store.get_entries(&query, None, state.config.pagination.page_size),
        store.get_glossary(),
        store.get_metadata(),
        store.get_filter_values(),
    )
    .map_err(page_err)?;
    crate::metrics::page_served("timeline");

    Ok(render(&TimelineTemplate {
        prefs,
        grift_total: format_usd(metadata.grift_total),
        groups: filter_groups(&values, &selection),
        starred: selection.starred,
        sort: selection.sort.as_str(),
        collection: selection.collection.clone(),
        entries: EntryView::build_all(&page.entries, &glossary, &metadata, &state.config.assets),
        next_url: next_page_url(&selection, page.next_cursor.as_deref()),
    }))
}

/// Next infinite-scroll fragment. Failures render a retry control in place
/// of the sentinel so the reader can trigger the fetch again.
async fn entries_partial(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<TimelineParams>,
) -> Response {
    let selection = match params.selection() {
        Ok(s) => s,
        Err(err) => return scroll_error(&headers, err, None),
    };
    let retry_url = {
        let mut pairs = selection.to_query_pairs();
        if let Some(cursor) = non_blank(params.cursor.as_deref()) {
            pairs.push(("cursor", cursor.to_string()));
        }
        format!("/partials/entries{}", query_string(&pairs))
    };

    let result = async {
        let query = build_query(&selection)?;
        let cursor = parse_cursor(params.cursor.as_deref())?;
        let store = &state.store;
        let (page, glossary, metadata) = tokio::try_join!(
            store.get_entries(&query, cursor.as_ref(), state.config.pagination.page_size),
            store.get_glossary(),
            store.get_metadata(),
        )?;
        Ok::<_, TimelineError>(EntriesPartialTemplate {
            entries: EntryView::build_all(&page.entries, &glossary, &metadata, &state.config.assets),
            next_url: next_page_url(&selection, page.next_cursor.as_deref()),
        })
    }
    .await;

    match result {
        Ok(template) => {
            crate::metrics::page_served("scroll");
            render(&template)
        }
        Err(err @ TimelineError::TransientFetch(_)) => scroll_error(&headers, err, Some(retry_url)),
        Err(err) => scroll_error(&headers, err, None),
    }
}

fn scroll_error(headers: &HeaderMap, err: TimelineError, retry_url: Option<String>) -> Response {
    log_error(&err);
    let message = match &err {
        TimelineError::TransientFetch(_) => "Couldn't load more entries.".to_string(),
        other => other.to_string(),
    };
    // htmx only swaps 2xx responses, so fragment requests always get 200.
    let status = if is_htmx(headers) {
        StatusCode::OK
    } else {
        status_for(&err)
    };
    (status, render(&ScrollErrorTemplate { message, retry_url })).into_response()
}

async fn all_entries(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LinearParams>,
) -> Result<Response, PageError> {
    let prefs = prefs_from(&headers);
    let page_err = move |err| PageError { err, prefs };

    let direction = params.direction().map_err(page_err)?;
    let cursor = parse_cursor(params.cursor.as_deref()).map_err(page_err)?;
    let store = &state.store;
    let (page, glossary, metadata) = tokio::try_join!(
        store.get_all_entries(cursor.as_ref(), direction, state.config.pagination.linear_page_size),
        store.get_glossary(),
        store.get_metadata(),
    )
    .map_err(page_err)?;
    crate::metrics::page_served("all");

    Ok(render(&AllTemplate {
        prefs,
        dir: direction.as_str(),
        entries: EntryView::build_all(&page.entries, &glossary, &metadata, &state.config.assets),
        next_url: next_linear_url(direction, page.next_cursor.as_deref()),
    }))
}

async fn entry_page(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(readable_id): Path<String>,
) -> Result<Response, PageError> {
    let prefs = prefs_from(&headers);
    let store = &state.store;
    let (entry, glossary, metadata) = tokio::try_join!(
        store.get_entry_by_readable_id(&readable_id),
        store.get_glossary(),
        store.get_metadata(),
    )
    .map_err(|err| PageError { err, prefs })?;

    Ok(render(&EntryTemplate {
        prefs,
        item: EntryView::build(&entry, &glossary, &metadata, &state.config.assets),
    }))
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LeaderboardParams>,
) -> Result<Response, PageError> {
    let prefs = prefs_from(&headers);
    let page_err = move |err| PageError { err, prefs };

    let request = params.request(&state.config).map_err(page_err)?;
    let page = state
        .store
        .get_entries_for_leaderboard(&request)
        .await
        .map_err(page_err)?;
    crate::metrics::page_served("leaderboard");

    Ok(render(&LeaderboardTemplate {
        prefs,
        board: LeaderboardView::build(&page, &request),
    }))
}

async fn api_entries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TimelineParams>,
) -> Result<Response, ApiError> {
    let query = build_query(&params.selection()?)?;
    let cursor = parse_cursor(params.cursor.as_deref())?;
    let page_size = params
        .page_size
        .unwrap_or(state.config.pagination.page_size);
    if page_size == 0 {
        return Err(TimelineError::invalid("page_size must be positive").into());
    }
    let page = state
        .store
        .get_entries(&query, cursor.as_ref(), page_size)
        .await?;
    crate::metrics::page_served("api");
    Ok(Json(page).into_response())
}

async fn api_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: EntryId = id.parse()?;
    let entry = state.store.get_entry(&id).await?;
    Ok(Json(entry).into_response())
}

async fn api_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Response, ApiError> {
    let request = params.request(&state.config)?;
    let page = state.store.get_entries_for_leaderboard(&request).await?;
    crate::metrics::page_served("api");
    Ok(Json(page).into_response())
}

#[derive(Deserialize)]
struct PreferencesForm {
    theme: Option<String>,
    font: Option<String>,
}

/// Path part of a same-origin `Referer`, so the reader lands back where they were.
fn referer_path(headers: &HeaderMap) -> Option<String> {
    let referer = headers.get(header::REFERER)?.to_str().ok()?;
    let after_scheme = referer.split_once("://").map_or(referer, |(_, rest)| rest);
    let path = &after_scheme[after_scheme.find('/')?..];
    (!path.starts_with("//")).then(|| path.to_string())
}

async fn save_preferences(
    headers: HeaderMap,
    Form(form): Form<PreferencesForm>,
) -> Result<Response, ApiError> {
    let mut prefs = prefs_from(&headers);
    if let Some(theme) = non_blank(form.theme.as_deref()) {
        prefs.theme = theme.parse()?;
    }
    if let Some(font) = non_blank(form.font.as_deref()) {
        prefs.font = font.parse()?;
    }
    tracing::debug!(%prefs, "preferences saved");

    let location = referer_path(&headers).unwrap_or_else(|| "/".to_string());
    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::SET_COOKIE, prefs.to_set_cookie()),
            (header::LOCATION, location),
        ],
    )
        .into_response())
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.prometheus.run_upkeep();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}

// --- Router ---

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/partials/entries", get(entries_partial))
        .route("/all", get(all_entries))
        .route("/entry/{readable_id}", get(entry_page))
        .route("/leaderboard", get(leaderboard))
        .route("/api/entries", get(api_entries))
        .route("/api/entries/{id}", get(api_entry))
        .route("/api/leaderboard", get(api_leaderboard))
        .route("/preferences", post(save_preferences))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let _otel_guard = common::observability::init("timeline-web", &config.general.log_level)?;
    let prometheus = crate::metrics::init_global()?;

    let db = AsyncDb::open(&config.database.path).await?;
    let store = EntryStore::new(db, config.pagination.max_page_size);
    let web = config.web();

    let state = Arc::new(AppState {
        store,
        config,
        prometheus,
    });

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", web.host, web.port).parse()?;
    tracing::info!(%addr, "timeline listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use common::db::{put_glossary_entry, set_collection_label, upsert_entry, Database};
    use common::types::{Entry, GlossaryEntry};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    const TEST_CONFIG: &str = r#"
[general]
log_level = "info"

[database]
path = "unused"

[pagination]
page_size = 3
linear_page_size = 4
max_page_size = 10

[leaderboard]
page_size = 2

[assets]
cdn_base_url = "https://cdn.test"
"#;

    fn entry(day: u32) -> Entry {
        let id = format!("2022-01-{day:02}-0");
        let mut doc = serde_json::json!({
            "id": id,
            "readableId": format!("incident-{day}"),
            "title": format!("Incident {day}"),
            "date": &id[..10],
            "body": "Classic [[rug-pull]] behaviour.",
            "filters": {
                "theme": [if day % 2 == 1 { "hack" } else { "rugpull" }],
                "blockchain": ["ethereum"],
            },
            "collection": ["nft-collapse"],
            "starred": day == 4,
            "image": { "src": "/img/x.webp", "alt": "logo" },
        });
        if day % 3 == 0 {
            doc["scamAmountDetails"] = serde_json::json!({
                "total": (u64::from(day) * 1_000_000).to_string(),
                "hasScamAmount": true,
            });
        }
        serde_json::from_value(doc).unwrap()
    }

    async fn create_test_app() -> Router {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        {
            let mut db = Database::open(&path).unwrap();
            db.run_migrations().unwrap();
            for day in 1..=7 {
                upsert_entry(&mut db.conn, &entry(day)).unwrap();
            }
            put_glossary_entry(
                &db.conn,
                &GlossaryEntry {
                    id: "rug-pull".into(),
                    term: "rug pull".into(),
                    definition: "Founders vanish with the money.".into(),
                },
            )
            .unwrap();
            set_collection_label(&db.conn, "nft-collapse", "NFT collapse").unwrap();
        }
        // Keep the file alive for the rest of the test.
        std::mem::forget(tmp);

        let db = AsyncDb::open(&path).await.unwrap();
        let config = Config::from_toml_str(TEST_CONFIG).unwrap();
        let state = Arc::new(AppState {
            store: EntryStore::new(db, config.pagination.max_page_size),
            config,
            prometheus: PrometheusBuilder::new().build_recorder().handle(),
        });
        create_router(state)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_index_renders_first_page_newest_first() {
        let (status, body) = get(create_test_app().await, "/").await;
        assert_eq!(status, StatusCode::OK);
        let i7 = body.find("Incident 7").unwrap();
        let i5 = body.find("Incident 5").unwrap();
        assert!(i7 < i5);
        assert!(!body.contains("Incident 4<"));
        assert!(body.contains("hx-trigger=\"revealed\""));
        assert!(body.contains("cursor=2022-01-05-0"));
        assert!(body.contains("$9,000,000"), "grift total missing");
    }

    #[tokio::test]
    async fn test_body_glossary_and_labels_rendered() {
        let (_, body) = get(create_test_app().await, "/").await;
        assert!(body.contains("title=\"Founders vanish with the money.\""));
        assert!(body.contains(">rug pull</abbr>"));
        assert!(body.contains("NFT collapse"));
        assert!(body.contains("https://cdn.test/img/x.webp"));
    }

    #[tokio::test]
    async fn test_partial_pages_until_exhausted() {
        let app = create_test_app().await;
        let (status, second) = get(app.clone(), "/partials/entries?sort=desc&cursor=2022-01-05-0").await;
        assert_eq!(status, StatusCode::OK);
        assert!(second.contains("Incident 4"));
        assert!(second.contains("Incident 2"));
        assert!(!second.contains("Incident 5"));
        assert!(second.contains("cursor=2022-01-02-0"));

        let (_, last) = get(app, "/partials/entries?sort=desc&cursor=2022-01-02-0").await;
        assert!(last.contains("Incident 1"));
        assert!(!last.contains("hx-trigger=\"revealed\""));
        assert!(last.contains("everything"));
    }

    #[tokio::test]
    async fn test_combined_filter_select_applies_category() {
        let (status, body) = get(create_test_app().await, "/partials/entries?filter=theme%3Arugpull").await;
        assert_eq!(status, StatusCode::OK);
        for day in [2, 4, 6] {
            assert!(body.contains(&format!("Incident {day}<")), "missing {day}");
        }
        for day in [1, 3, 5, 7] {
            assert!(!body.contains(&format!("Incident {day}<")), "unexpected {day}");
        }
    }

    #[tokio::test]
    async fn test_starred_is_an_option_of_the_filter_select() {
        let app = create_test_app().await;
        let (status, page) = get(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("value=\"starred:true\""));
        assert!(!page.contains("type=\"checkbox\""));

        let (status, body) = get(app, "/partials/entries?filter=starred%3Atrue").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Incident 4<"));
        for day in [1, 2, 3, 5, 6, 7] {
            assert!(!body.contains(&format!("Incident {day}<")), "unexpected {day}");
        }
    }

    #[tokio::test]
    async fn test_invalid_filter_combination() {
        let app = create_test_app().await;
        let (status, body) = get(app.clone(), "/api/entries?theme=hack&starred=true").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("invalid_query"));

        let (status, _) = get(app.clone(), "/?theme=hack&tech=nft").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .uri("/partials/entries?theme=hack&starred=true")
            .header("HX-Request", "true")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("cannot be combined"));
    }

    #[tokio::test]
    async fn test_api_entries_json_page() {
        let (status, body) = get(create_test_app().await, "/api/entries?starred=true").await;
        assert_eq!(status, StatusCode::OK);
        let page: serde_json::Value = serde_json::from_str(&body).unwrap();
        let entries = page["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["_key"], "2022-01-04-0");
        assert!(page["nextCursor"].is_null());
        assert_eq!(page["pageSize"], 3);
    }

    #[tokio::test]
    async fn test_api_entries_rejects_zero_page_size_and_bad_cursor() {
        let app = create_test_app().await;
        let (status, _) = get(app.clone(), "/api/entries?page_size=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get(app, "/api/entries?cursor=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entry_deep_link() {
        let app = create_test_app().await;
        let (status, body) = get(app.clone(), "/entry/incident-3").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Incident 3"));
        assert!(body.contains("$3,000,000"));

        let (status, body) = get(app.clone(), "/entry/does-not-exist").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Not found"));

        let (status, _) = get(app, "/api/entries/2022-01-09-0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_linear_browsing_pages() {
        let app = create_test_app().await;
        let (status, body) = get(app.clone(), "/all?dir=asc").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Incident 1"));
        assert!(body.contains("Incident 4"));
        assert!(!body.contains("Incident 5"));
        let next = body
            .split("href=\"")
            .map(|rest| rest.split('"').next().unwrap_or_default())
            .find(|href| href.starts_with("/all?"))
            .unwrap();
        assert!(next.contains("dir=asc"));
        assert!(next.contains("cursor=2022-01-04-0"));

        let (_, rest) = get(app, "/all?dir=asc&cursor=2022-01-04-0").await;
        assert!(rest.contains("Incident 5"));
        assert!(rest.contains("Incident 7"));
        assert!(!rest.contains("Next page"));
    }

    #[tokio::test]
    async fn test_leaderboard_page_and_api() {
        let app = create_test_app().await;
        let (status, body) = get(app.clone(), "/leaderboard").await;
        assert_eq!(status, StatusCode::OK);
        let six = body.find("Incident 6").unwrap();
        let three = body.find("Incident 3").unwrap();
        assert!(six < three);

        let (status, body) = get(app.clone(), "/api/leaderboard?range=2022&sort=date&dir=asc").await;
        assert_eq!(status, StatusCode::OK);
        let page: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(page["totalCount"], 2);
        assert_eq!(page["entries"][0]["_key"], "2022-01-03-0");

        let (status, body) = get(app.clone(), "/api/leaderboard?range=2021").await;
        assert_eq!(status, StatusCode::OK);
        let page: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(page["totalCount"], 0);

        let (status, _) = get(app, "/api/leaderboard?page=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_preferences_round_trip_through_cookie() {
        let app = create_test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/preferences")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::REFERER, "http://localhost:8080/leaderboard?range=2022")
            .body(Body::from("theme=dark&font=serif"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/leaderboard?range=2022"
        );
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let cookie = set_cookie.split(';').next().unwrap().to_string();

        let request = Request::builder()
            .uri("/")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(app, request).await;
        assert!(body.contains("data-theme=\"dark\""));
        assert!(body.contains("class=\"font-serif\""));
    }

    #[tokio::test]
    async fn test_preferences_reject_unknown_theme() {
        let request = Request::builder()
            .method("POST")
            .uri("/preferences")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("theme=neon"))
            .unwrap();
        let (status, _) = send(create_test_app().await, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = create_test_app().await;
        let (status, body) = get(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        let (status, _) = get(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_referer_path() {
        let mut headers = HeaderMap::new();
        assert_eq!(referer_path(&headers), None);
        headers.insert(header::REFERER, "https://example.org/all?dir=asc".parse().unwrap());
        assert_eq!(referer_path(&headers).as_deref(), Some("/all?dir=asc"));
        headers.insert(header::REFERER, "https://example.org".parse().unwrap());
        assert_eq!(referer_path(&headers), None);
    }
}

use actix_web::{http::header, http::StatusCode, middleware::from_fn, web, HttpRequest, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{logout_guard, member_validator, AuthUser},
    dashboard::{self, DashboardStats, StatsSource},
    db,
    error::AppError,
    models::{BudgetStatus, ServiceOrder, ServiceType},
    orders::{self, NewServiceOrder, OrderFilter},
    routes::{budget_options, service_type_options, to_view, ChoiceOption, OrderView},
    shadow::SyncState,
    state::{AppState, ServerEvent},
    storage::StorageError,
    templates::{render, render_with_status},
};

const RECENT_LIMIT: usize = 8;
const FILE_NAME_HEADER: &str = "X-File-Name";
const MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
struct StatCard {
    label: &'static str,
    value: i64,
    link: String,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    display_name: String,
    stats: Vec<StatCard>,
    recent: Vec<OrderView>,
    notice: String,
    pending_sync: usize,
    is_admin: bool,
}

#[derive(Clone, Debug, Default)]
struct OrderFormView {
    client_name: String,
    phone: String,
    address: String,
    due_date: String,
    budget: String,
}

#[derive(Template)]
#[template(path = "service_new.html")]
struct NewServiceTemplate {
    form: OrderFormView,
    service_types: Vec<ChoiceOption>,
    budget_statuses: Vec<ChoiceOption>,
    errors: Vec<String>,
    is_admin: bool,
}

#[derive(Deserialize)]
struct DashboardQuery {
    saved: Option<String>,
}

#[derive(Deserialize)]
struct NewServiceForm {
    client_name: String,
    phone: String,
    address: String,
    service_type: String,
    due_date: String,
    budget: String,
    budget_status: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/app")
            .wrap(HttpAuthentication::basic(member_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(show_dashboard)))
            .service(
                web::resource("/services/new")
                    .route(web::get().to(new_service))
                    .route(web::post().to(create_service)),
            )
            .service(
                web::resource("/services/{id}/photos")
                    .app_data(web::PayloadConfig::new(MAX_PHOTO_BYTES))
                    .route(web::post().to(upload_photo)),
            ),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/app/dashboard"))
        .finish()
}

fn stat_cards(stats: DashboardStats, is_admin: bool) -> Vec<StatCard> {
    let link = |query: &str| {
        if is_admin {
            format!("/admin/services?{query}")
        } else {
            String::new()
        }
    };
    vec![
        StatCard {
            label: "Active services",
            value: stats.active,
            link: link("status=active"),
        },
        StatCard {
            label: "Completed today",
            value: stats.completed_today,
            // The service list has no date filter, so a link would overcount.
            link: String::new(),
        },
        StatCard {
            label: "Pending services",
            value: stats.pending,
            link: link("status=pending"),
        },
        StatCard {
            label: "Budgets pending",
            value: stats.budget_pending,
            link: link("budget_status=pending"),
        },
        StatCard {
            label: "Budgets approved",
            value: stats.budget_approved,
            link: link("budget_status=approved"),
        },
        StatCard {
            label: "Budgets rejected",
            value: stats.budget_rejected,
            link: link("budget_status=rejected"),
        },
    ]
}

async fn show_dashboard(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<DashboardQuery>,
) -> Result<HttpResponse> {
    let (stats, source) =
        dashboard::load_stats(&state.db, &state.shadow, auth.scope(), Utc::now()).await;

    let filter = OrderFilter {
        owner: auth.scope().map(str::to_string),
        ..OrderFilter::default()
    };
    let recent = match orders::list(&state.db, &filter).await {
        Ok(orders) => orders,
        Err(err) => {
            log::warn!("Recent orders unavailable, using shadow copy: {err}");
            state.shadow.list(&filter).await
        }
    };

    let notice = if query.saved.as_deref() == Some("offline") {
        "The service was saved offline and will be synced when the database is reachable."
    } else if source == StatsSource::Shadow {
        "Showing offline figures; the database could not be reached."
    } else {
        ""
    };

    Ok(render(DashboardTemplate {
        display_name: auth.display_name.clone(),
        stats: stat_cards(stats, auth.is_admin()),
        recent: recent.into_iter().take(RECENT_LIMIT).map(to_view).collect(),
        notice: notice.to_string(),
        pending_sync: state.shadow.pending_count().await,
        is_admin: auth.is_admin(),
    }))
}

async fn new_service(auth: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    Ok(render(NewServiceTemplate {
        form: OrderFormView::default(),
        service_types: service_type_options(None),
        budget_statuses: budget_options(Some(BudgetStatus::Pending)),
        errors: Vec::new(),
        is_admin: auth.is_admin(),
    }))
}

async fn create_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    form: web::Form<NewServiceForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let input = NewServiceOrder {
        client_name: form.client_name,
        phone: form.phone,
        address: form.address,
        service_type: form.service_type,
        due_date: form.due_date,
        budget: form.budget,
        budget_status: form.budget_status.unwrap_or_default(),
    };

    let order = match input.validate(&auth.id, &db::now()) {
        Ok(order) => order,
        Err(errors) => {
            return Ok(render_with_status(
                StatusCode::BAD_REQUEST,
                NewServiceTemplate {
                    service_types: service_type_options(input.service_type.parse::<ServiceType>().ok()),
                    budget_statuses: budget_options(input.budget_status.parse::<BudgetStatus>().ok()),
                    form: OrderFormView {
                        client_name: input.client_name,
                        phone: input.phone,
                        address: input.address,
                        due_date: input.due_date,
                        budget: input.budget,
                    },
                    errors: errors.iter().map(ToString::to_string).collect(),
                    is_admin: auth.is_admin(),
                },
            ));
        }
    };

    let location = match orders::insert(&state.db, &order, &auth.id).await {
        Ok(()) => {
            log::info!("{} created service order {}", auth.email, order.id);
            state.publish(ServerEvent::from_order("service_created", &order));
            remember(&state, order, SyncState::Synced).await;
            "/app/dashboard"
        }
        Err(err) => {
            log::warn!("Service order {} kept offline: {err}", order.id);
            remember(&state, order, SyncState::Pending).await;
            "/app/dashboard?saved=offline"
        }
    };

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, location))
        .finish())
}

/// Mirrors `order` into the shadow cache. A failed cache write is logged and
/// does not fail the request.
pub(crate) async fn remember(state: &AppState, order: ServiceOrder, sync: SyncState) {
    let id = order.id.clone();
    if let Err(err) = state.shadow.record(order, sync).await {
        log::error!("Shadow cache write failed for {id}: {err}");
    }
}

/// Database copy first, shadow copy when the database cannot answer.
pub(crate) async fn find_order(state: &AppState, id: &str) -> Result<Option<ServiceOrder>, AppError> {
    match orders::fetch(&state.db, id).await {
        Ok(order) => Ok(order),
        Err(err) => match state.shadow.get(id).await {
            Some(entry) => {
                log::warn!("Order {id} served from shadow copy: {err}");
                Ok(Some(entry.order))
            }
            None => Err(err.into()),
        },
    }
}

async fn upload_photo(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let order_id = path.into_inner();
    let mut order = find_order(&state, &order_id)
        .await?
        .ok_or(AppError::NotFound("Service order"))?;
    if !auth.is_admin() && order.user_id != auth.id {
        return Err(AppError::Forbidden.into());
    }

    let file_name = req
        .headers()
        .get(FILE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("photo.jpg");

    let url = match state
        .storage
        .upload_or_placeholder(&order.user_id, file_name, &body)
        .await
    {
        Ok(url) => url,
        Err(StorageError::Empty) => {
            return Err(AppError::InvalidInput("The photo is empty.".to_string()).into())
        }
        Err(err) => return Err(AppError::Storage(err).into()),
    };

    match orders::add_photo(&state.db, &order_id, &url, &auth.id).await {
        Ok(Some(updated)) => {
            state.publish(ServerEvent::from_order("photo_added", &updated));
            remember(&state, updated, SyncState::Synced).await;
        }
        Ok(None) => return Err(AppError::NotFound("Service order").into()),
        Err(err) => {
            log::warn!("Photo for {order_id} kept offline: {err}");
            order.photos.push(url.clone());
            order.updated_at = db::now();
            remember(&state, order, SyncState::Pending).await;
        }
    }

    Ok(HttpResponse::Created().json(json!({ "url": url })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::ServiceStatus, orders::sample_order, routes::basic_auth as basic, state::test_state};
    use actix_web::{test, App};

    #[::core::prelude::v1::test]
    fn stat_cards_link_only_to_matching_lists() {
        let cards = stat_cards(DashboardStats::default(), true);
        let links: Vec<_> = cards.iter().map(|card| card.link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "/admin/services?status=active",
                "",
                "/admin/services?status=pending",
                "/admin/services?budget_status=pending",
                "/admin/services?budget_status=approved",
                "/admin/services?budget_status=rejected",
            ]
        );
        assert!(stat_cards(DashboardStats::default(), false)
            .iter()
            .all(|card| card.link.is_empty()));
    }

    fn order_form() -> [(&'static str, &'static str); 7] {
        [
            ("client_name", "Ana Souza"),
            ("phone", "11999990000"),
            ("address", "Rua A, 10"),
            ("service_type", "repair"),
            ("due_date", "2024-06-20"),
            ("budget", "150.00"),
            ("budget_status", ""),
        ]
    }

    #[actix_web::test]
    async fn creating_a_service_stores_and_mirrors_it() {
        let (state, _dir) = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/app/services/new")
            .insert_header(basic("user@example.com", "staff-secret"))
            .set_form(order_form())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/app/dashboard");

        let stored = orders::all(&state.db).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ServiceStatus::Pending);
        assert_eq!(stored[0].budget_status, BudgetStatus::Pending);
        assert_eq!(stored[0].budget_cents, 15_000);

        let entry = state.shadow.get(&stored[0].id).await.unwrap();
        assert_eq!(entry.sync, SyncState::Synced);
    }

    #[actix_web::test]
    async fn invalid_service_form_is_rejected() {
        let (state, _dir) = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let mut form = order_form();
        form[0] = ("client_name", " ");
        form[5] = ("budget", "12.345");
        let req = test::TestRequest::post()
            .uri("/app/services/new")
            .insert_header(basic("user@example.com", "staff-secret"))
            .set_form(form)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(orders::all(&state.db).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn failed_insert_is_kept_offline() {
        let (state, _dir) = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;
        sqlx::query("DROP TABLE service_history")
            .execute(&state.db)
            .await
            .unwrap();

        let req = test::TestRequest::post()
            .uri("/app/services/new")
            .insert_header(basic("user@example.com", "staff-secret"))
            .set_form(order_form())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/app/dashboard?saved=offline"
        );
        assert_eq!(state.shadow.pending_count().await, 1);
        assert!(orders::all(&state.db).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn dashboard_requires_credentials() {
        let (state, _dir) = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/app/dashboard").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/app/dashboard")
            .insert_header(basic("user@example.com", "staff-secret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn only_the_owner_or_an_admin_can_add_photos() {
        let (state, _dir) = test_state().await;
        let order = sample_order("Ana Souza", "someone-else");
        orders::insert(&state.db, &order, "someone-else").await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;
        let uri = format!("/app/services/{}/photos", order.id);

        let req = test::TestRequest::post()
            .uri(&uri)
            .insert_header(basic("user@example.com", "staff-secret"))
            .insert_header((FILE_NAME_HEADER, "door.jpg"))
            .set_payload("jpeg")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri(&uri)
            .insert_header(basic("admin@example.com", "admin-secret"))
            .insert_header((FILE_NAME_HEADER, "door.jpg"))
            .set_payload("jpeg")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let url = body["url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/uploads/someone-else/"));

        let stored = orders::fetch(&state.db, &order.id).await.unwrap().unwrap();
        assert_eq!(stored.photos, vec![url]);
    }
}

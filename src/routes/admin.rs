use std::str::FromStr;

use actix_web::{http::header, middleware::from_fn, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use chrono::{Local, NaiveDate};
use serde::Deserialize;

use crate::{
    appointments,
    auth::{admin_validator, logout_guard, AuthUser},
    db,
    error::AppError,
    models::{
        AppointmentRow, BudgetStatus, ServiceHistoryRow, ServiceOrder, ServiceStatus, ServiceType,
        UnknownValue, APPOINTMENT_CONFIRMED,
    },
    orders::{self, OrderFilter},
    routes::{
        budget_options, member::{find_order, remember}, safe_next, service_type_options,
        status_options, to_view, ChoiceOption, OrderView,
    },
    shadow::{self, SyncState},
    slots,
    state::{AppState, ServerEvent},
    templates::render,
};

#[derive(Clone, Debug)]
struct HistoryView {
    action: String,
    change: String,
    actor: String,
    created_at: String,
}

#[derive(Clone, Debug)]
struct AppointmentView {
    id: String,
    client_name: String,
    contact: String,
    service_text: String,
    time: String,
    status: String,
    cancellable: bool,
}

#[derive(Template)]
#[template(path = "admin_services.html")]
struct AdminServicesTemplate {
    orders: Vec<OrderView>,
    status_filters: Vec<ChoiceOption>,
    budget_filters: Vec<ChoiceOption>,
    notice: String,
    pending_sync: usize,
    current_path: String,
    is_admin: bool,
}

#[derive(Template)]
#[template(path = "admin_service_detail.html")]
struct AdminServiceDetailTemplate {
    order: OrderView,
    history: Vec<HistoryView>,
    notice: String,
    is_admin: bool,
}

#[derive(Template)]
#[template(path = "admin_search.html")]
struct AdminSearchTemplate {
    client_name: String,
    service_types: Vec<ChoiceOption>,
    status_filters: Vec<ChoiceOption>,
    budget_filters: Vec<ChoiceOption>,
    results: Vec<OrderView>,
    searched: bool,
    notice: String,
    is_admin: bool,
}

#[derive(Template)]
#[template(path = "admin_appointments.html")]
struct AdminAppointmentsTemplate {
    date: String,
    appointments: Vec<AppointmentView>,
    open_slots: Vec<String>,
    blocked: Vec<String>,
    notice: String,
    is_admin: bool,
}

#[derive(Deserialize)]
struct ServiceListQuery {
    status: Option<String>,
    budget_status: Option<String>,
    synced: Option<usize>,
    failed: Option<usize>,
}

#[derive(Deserialize)]
struct SearchQuery {
    client_name: Option<String>,
    service_type: Option<String>,
    status: Option<String>,
    budget_status: Option<String>,
}

#[derive(Deserialize)]
struct StatusForm {
    status: String,
    next: Option<String>,
}

#[derive(Deserialize)]
struct BudgetForm {
    budget_status: String,
    next: Option<String>,
}

#[derive(Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct SlotForm {
    date: String,
    time: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(HttpAuthentication::basic(admin_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/services").route(web::get().to(list_services)))
            .service(web::resource("/services/{id}").route(web::get().to(service_detail)))
            .service(web::resource("/services/{id}/status").route(web::post().to(update_status)))
            .service(web::resource("/services/{id}/budget").route(web::post().to(update_budget)))
            .service(web::resource("/search").route(web::get().to(search)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}/cancel")
                    .route(web::post().to(cancel_appointment)),
            )
            .service(web::resource("/schedule/block").route(web::post().to(block_slot)))
            .service(web::resource("/schedule/unblock").route(web::post().to(unblock_slot)))
            .service(web::resource("/sync").route(web::post().to(sync))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/admin/services"))
        .finish()
}

/// Blank means "no filter"; anything else must name a known value.
fn optional_filter<T>(value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|err: T::Err| AppError::InvalidInput(err.to_string())),
    }
}

/// Database rows, or the shadow copy when the query fails.
async fn list_orders(state: &AppState, filter: &OrderFilter) -> (Vec<ServiceOrder>, bool) {
    match orders::list(&state.db, filter).await {
        Ok(orders) => (orders, false),
        Err(err) => {
            log::warn!("Order list unavailable, using shadow copy: {err}");
            (state.shadow.list(filter).await, true)
        }
    }
}

const OFFLINE_NOTICE: &str = "The database could not be reached; showing the offline copy.";

async fn list_services(
    state: web::Data<AppState>,
    query: web::Query<ServiceListQuery>,
) -> Result<HttpResponse> {
    let status = optional_filter::<ServiceStatus>(query.status.as_deref())?;
    let budget_status = optional_filter::<BudgetStatus>(query.budget_status.as_deref())?;
    let filter = OrderFilter {
        status,
        budget_status,
        ..OrderFilter::default()
    };

    let (orders, offline) = list_orders(&state, &filter).await;
    let notice = match (offline, query.synced, query.failed) {
        (true, _, _) => OFFLINE_NOTICE.to_string(),
        (false, Some(synced), Some(failed)) => {
            format!("Sync finished: {synced} written back, {failed} still pending.")
        }
        _ => String::new(),
    };

    let mut current_path = "/admin/services".to_string();
    let mut params = Vec::new();
    if let Some(status) = status {
        params.push(format!("status={status}"));
    }
    if let Some(budget_status) = budget_status {
        params.push(format!("budget_status={budget_status}"));
    }
    if !params.is_empty() {
        current_path = format!("{current_path}?{}", params.join("&"));
    }

    Ok(render(AdminServicesTemplate {
        orders: orders.into_iter().map(to_view).collect(),
        status_filters: status_options(status),
        budget_filters: budget_options(budget_status),
        notice,
        pending_sync: state.shadow.pending_count().await,
        current_path,
        is_admin: true,
    }))
}

fn to_history_view(row: ServiceHistoryRow) -> HistoryView {
    let change = match (row.old_status, row.new_status) {
        (Some(old), Some(new)) => format!("{old} → {new}"),
        (None, Some(new)) => new,
        _ => String::new(),
    };
    HistoryView {
        action: row.action.replace('_', " "),
        change,
        actor: row.actor_id.unwrap_or_default(),
        created_at: row.created_at,
    }
}

async fn service_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let order = find_order(&state, &id)
        .await?
        .ok_or(AppError::NotFound("Service order"))?;

    let (history, notice) = match orders::history(&state.db, &id).await {
        Ok(rows) => (rows.into_iter().map(to_history_view).collect(), String::new()),
        Err(err) => {
            log::warn!("History for {id} unavailable: {err}");
            (Vec::new(), OFFLINE_NOTICE.to_string())
        }
    };

    Ok(render(AdminServiceDetailTemplate {
        order: to_view(order),
        history,
        notice,
        is_admin: true,
    }))
}

/// Applies `change` to the shadow copy and keeps it pending.
async fn update_offline(
    state: &AppState,
    id: &str,
    err: sqlx::Error,
    change: impl FnOnce(&mut ServiceOrder),
) -> Result<(), AppError> {
    let Some(entry) = state.shadow.get(id).await else {
        return Err(err.into());
    };
    log::warn!("Update of {id} kept offline: {err}");
    let mut order = entry.order;
    change(&mut order);
    order.updated_at = db::now();
    remember(state, order, SyncState::Pending).await;
    Ok(())
}

async fn after_update(
    state: &AppState,
    result: Result<Option<ServiceOrder>, sqlx::Error>,
    id: &str,
    change: impl FnOnce(&mut ServiceOrder),
) -> Result<(), AppError> {
    match result {
        Ok(Some(order)) => {
            state.publish(ServerEvent::from_order("service_updated", &order));
            remember(state, order, SyncState::Synced).await;
            Ok(())
        }
        Ok(None) => Err(AppError::NotFound("Service order")),
        Err(err) => update_offline(state, id, err, change).await,
    }
}

async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<StatusForm>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let form = form.into_inner();
    let status: ServiceStatus = form
        .status
        .parse()
        .map_err(|err: UnknownValue| AppError::InvalidInput(err.to_string()))?;

    let result = orders::update_status(&state.db, &id, status, &auth.id).await;
    after_update(&state, result, &id, |order| order.status = status).await?;
    log::info!("{} set order {id} to {status}", auth.email);

    let fallback = format!("/admin/services/{id}");
    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, safe_next(form.next.as_deref(), &fallback)))
        .finish())
}

async fn update_budget(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<BudgetForm>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let form = form.into_inner();
    let budget_status: BudgetStatus = form
        .budget_status
        .parse()
        .map_err(|err: UnknownValue| AppError::InvalidInput(err.to_string()))?;

    let result = orders::update_budget_status(&state.db, &id, budget_status, &auth.id).await;
    after_update(&state, result, &id, |order| order.budget_status = budget_status).await?;
    log::info!("{} set budget of order {id} to {budget_status}", auth.email);

    let fallback = format!("/admin/services/{id}");
    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, safe_next(form.next.as_deref(), &fallback)))
        .finish())
}

async fn search(
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let service_type = optional_filter::<ServiceType>(query.service_type.as_deref())?;
    let status = optional_filter::<ServiceStatus>(query.status.as_deref())?;
    let budget_status = optional_filter::<BudgetStatus>(query.budget_status.as_deref())?;
    let client_name = query
        .client_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    let searched =
        client_name.is_some() || service_type.is_some() || status.is_some() || budget_status.is_some();
    let (results, notice) = if searched {
        let filter = OrderFilter {
            status,
            budget_status,
            service_type,
            client_name: client_name.clone(),
            owner: None,
        };
        let (orders, offline) = list_orders(&state, &filter).await;
        let notice = if offline { OFFLINE_NOTICE } else { "" };
        (orders.into_iter().map(to_view).collect(), notice.to_string())
    } else {
        (Vec::new(), String::new())
    };

    Ok(render(AdminSearchTemplate {
        client_name: client_name.unwrap_or_default(),
        service_types: service_type_options(service_type),
        status_filters: status_options(status),
        budget_filters: budget_options(budget_status),
        results,
        searched,
        notice,
        is_admin: true,
    }))
}

fn to_appointment_view(row: AppointmentRow) -> AppointmentView {
    AppointmentView {
        cancellable: row.status == APPOINTMENT_CONFIRMED,
        id: row.id,
        client_name: row.client_name,
        contact: row.contact,
        service_text: row.service_text,
        time: row.time,
        status: row.status,
    }
}

fn schedule_url(date: &str) -> String {
    format!("/admin/appointments?date={date}")
}

async fn list_appointments(
    state: web::Data<AppState>,
    query: web::Query<DateQuery>,
) -> Result<HttpResponse, AppError> {
    let date = match query.date.as_deref().map(str::trim) {
        None | Some("") => Local::now().date_naive(),
        Some(value) => slots::parse_date(value)?,
    };

    let rows = appointments::list_for_date(&state.db, date).await?;
    let blocked = appointments::blocked_times(&state.db, date).await?;
    let open = appointments::availability(&state.db, date).await?;

    Ok(render(AdminAppointmentsTemplate {
        date: date.to_string(),
        appointments: rows.into_iter().map(to_appointment_view).collect(),
        notice: open.notice.unwrap_or_default().to_string(),
        open_slots: open.slots,
        blocked,
        is_admin: true,
    }))
}

async fn cancel_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let row = appointments::cancel(&state.db, &id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))?;
    log::info!("{} cancelled appointment {id}", auth.email);
    state.publish(ServerEvent::from_appointment("appointment_cancelled", &row));

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, schedule_url(&row.date)))
        .finish())
}

fn offered_slot(form: &SlotForm) -> Result<(NaiveDate, String), AppError> {
    let date = slots::parse_date(&form.date)?;
    let time = form.time.trim().to_string();
    if !slots::is_offered(date, &time) {
        return Err(AppError::InvalidInput(format!(
            "{time} is not a bookable slot on {date}"
        )));
    }
    Ok((date, time))
}

async fn block_slot(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    form: web::Form<SlotForm>,
) -> Result<HttpResponse, AppError> {
    let (date, time) = offered_slot(&form)?;
    if appointments::block(&state.db, date, &time, &auth.id).await? {
        log::info!("{} blocked {date} {time}", auth.email);
        state.publish(ServerEvent {
            kind: "slot_blocked".to_string(),
            date: Some(date.to_string()),
            time: Some(time),
            ..ServerEvent::default()
        });
    }

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, schedule_url(&date.to_string())))
        .finish())
}

async fn unblock_slot(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    form: web::Form<SlotForm>,
) -> Result<HttpResponse, AppError> {
    let date = slots::parse_date(&form.date)?;
    let time = form.time.trim();
    if appointments::unblock(&state.db, date, time).await? {
        log::info!("{} unblocked {date} {time}", auth.email);
        state.publish(ServerEvent {
            kind: "slot_unblocked".to_string(),
            date: Some(date.to_string()),
            time: Some(time.to_string()),
            ..ServerEvent::default()
        });
    }

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, schedule_url(&date.to_string())))
        .finish())
}

async fn sync(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> HttpResponse {
    let report = shadow::reconcile(&state.db, &state.shadow).await;
    log::info!(
        "{} ran a sync: {} written back, {} still pending",
        auth.email,
        report.synced,
        report.failed
    );

    HttpResponse::SeeOther()
        .append_header((
            header::LOCATION,
            format!(
                "/admin/services?synced={}&failed={}",
                report.synced, report.failed
            ),
        ))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{orders::sample_order, routes::basic_auth, state::test_state};
    use actix_web::{http::StatusCode, test, App};

    fn admin() -> (header::HeaderName, actix_web_httpauth::headers::authorization::Basic) {
        basic_auth("admin@example.com", "admin-secret")
    }

    #[actix_web::test]
    async fn staff_cannot_reach_admin_pages() {
        let (state, _dir) = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/admin/services")
            .insert_header(basic_auth("user@example.com", "staff-secret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/admin/services?status=active")
            .insert_header(admin())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri("/admin/services?status=archived")
            .insert_header(admin())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn status_update_records_history_and_redirects() {
        let (state, _dir) = test_state().await;
        let order = sample_order("Ana Souza", "bootstrap-staff");
        orders::insert(&state.db, &order, "bootstrap-staff").await.unwrap();
        let mut events = state.events.subscribe();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/admin/services/{}/status", order.id))
            .insert_header(admin())
            .set_form([("status", "active"), ("next", "/admin/services?status=pending")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/admin/services?status=pending"
        );

        let stored = orders::fetch(&state.db, &order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ServiceStatus::Active);
        let history = orders::history(&state.db, &order.id).await.unwrap();
        assert_eq!(history[0].new_status.as_deref(), Some("active"));
        assert_eq!(events.try_recv().unwrap().kind, "service_updated");

        let req = test::TestRequest::post()
            .uri("/admin/services/missing/budget")
            .insert_header(admin())
            .set_form([("budget_status", "approved")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn failed_update_is_kept_pending_until_sync() {
        let (state, _dir) = test_state().await;
        let order = sample_order("Bruno Lima", "bootstrap-staff");
        orders::insert(&state.db, &order, "bootstrap-staff").await.unwrap();
        state
            .shadow
            .record(order.clone(), SyncState::Synced)
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        sqlx::query("ALTER TABLE service_history RENAME TO service_history_off")
            .execute(&state.db)
            .await
            .unwrap();
        let req = test::TestRequest::post()
            .uri(&format!("/admin/services/{}/budget", order.id))
            .insert_header(admin())
            .set_form([("budget_status", "approved")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let entry = state.shadow.get(&order.id).await.unwrap();
        assert_eq!(entry.sync, SyncState::Pending);
        assert_eq!(entry.order.budget_status, BudgetStatus::Approved);

        sqlx::query("ALTER TABLE service_history_off RENAME TO service_history")
            .execute(&state.db)
            .await
            .unwrap();
        let req = test::TestRequest::post()
            .uri("/admin/sync")
            .insert_header(admin())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/admin/services?synced=1&failed=0"
        );

        let stored = orders::fetch(&state.db, &order.id).await.unwrap().unwrap();
        assert_eq!(stored.budget_status, BudgetStatus::Approved);
        assert_eq!(state.shadow.pending_count().await, 0);
    }

    #[actix_web::test]
    async fn blocking_rejects_slots_outside_opening_hours() {
        let (state, _dir) = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/admin/schedule/block")
            .insert_header(admin())
            .set_form([("date", "2024-06-02"), ("time", "10:00")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/admin/schedule/block")
            .insert_header(admin())
            .set_form([("date", "2024-06-05"), ("time", "10:00")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/admin/appointments?date=2024-06-05"
        );

        let wednesday = slots::parse_date("2024-06-05").unwrap();
        let open = appointments::availability(&state.db, wednesday).await.unwrap();
        assert_eq!(open.slots.len(), 21);

        let req = test::TestRequest::get()
            .uri("/admin/appointments?date=2024-06-05")
            .insert_header(admin())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

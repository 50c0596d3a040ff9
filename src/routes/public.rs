use actix_web::{http::header, http::StatusCode, web, HttpRequest, HttpResponse, Result};
use actix_web::http::header::Header;
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use askama::Template;
use chrono::Local;
use serde::Deserialize;
use serde_json::json;

use crate::{
    appointments::{self, BookingError, NewAppointment},
    auth::{authenticate_credentials, clear_logout_cookie, logout_cookie, AUTH_REALM},
    error::AppError,
    models::{offering_catalog, Offering},
    slots,
    state::{AppState, ServerEvent},
    templates::{render, render_with_status},
};

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    offerings: Vec<Offering>,
}

#[derive(Clone, Debug, Default)]
struct BookingView {
    client_name: String,
    contact: String,
    date: String,
}

#[derive(Clone, Debug)]
struct SlotOption {
    value: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "book.html")]
struct BookingTemplate {
    offerings: Vec<Offering>,
    form: BookingView,
    slots: Vec<SlotOption>,
    errors: Vec<String>,
    notice: String,
    today: String,
}

#[derive(Template)]
#[template(path = "book_success.html")]
struct BookingSuccessTemplate {
    client_name: String,
    service_text: String,
    date: String,
    time: String,
}

#[derive(Deserialize)]
struct BookingQuery {
    service: Option<String>,
    date: Option<String>,
}

#[derive(Deserialize)]
struct SlotsQuery {
    date: String,
}

#[derive(Deserialize)]
struct BookingForm {
    client_name: String,
    contact: String,
    service_id: String,
    date: String,
    time: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(
            web::resource("/book")
                .route(web::get().to(show_booking))
                .route(web::post().to(create_booking)),
        )
        .service(web::resource("/book/slots").route(web::get().to(available_slots)))
        .service(web::resource("/login").route(web::get().to(login)))
        .service(web::resource("/logout").route(web::get().to(logout)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn logout(req: HttpRequest) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/"))
        .cookie(logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

#[derive(Deserialize)]
struct LoginQuery {
    next: Option<String>,
}

async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LoginQuery>,
) -> HttpResponse {
    let auth = match Authorization::<Basic>::parse(&req) {
        Ok(auth) => auth,
        Err(_) => return auth_challenge(),
    };
    let credentials = auth.into_scheme();
    let email = credentials.user_id();
    let password = credentials.password().unwrap_or_default();

    let user = match authenticate_credentials(&state, email, password).await {
        Some(user) => user,
        None => return auth_challenge(),
    };

    let requested = query.next.as_deref().unwrap_or("");
    let redirect = if requested.starts_with("/app") || (user.is_admin() && requested.starts_with("/admin")) {
        requested
    } else {
        "/app/dashboard"
    };

    log::info!("{} signed in as {}", user.email, user.role);

    HttpResponse::SeeOther()
        .append_header((header::LOCATION, redirect))
        .cookie(clear_logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

fn auth_challenge() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", AUTH_REALM)))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn home() -> Result<HttpResponse> {
    Ok(render(HomeTemplate {
        offerings: offering_catalog(),
    }))
}

fn today() -> String {
    Local::now().date_naive().to_string()
}

fn catalog_with(selected: &str) -> Vec<Offering> {
    let mut offerings = offering_catalog();
    for offering in &mut offerings {
        offering.selected = offering.id == selected;
    }
    offerings
}

/// Server-side slot list for the form, so it works without JavaScript.
async fn slot_options(
    state: &AppState,
    date: &str,
    selected: &str,
) -> (Vec<SlotOption>, String) {
    if date.trim().is_empty() {
        return (Vec::new(), String::new());
    }
    let parsed = match slots::parse_date(date) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("Booking form: {err}");
            return (Vec::new(), err.notice().to_string());
        }
    };
    match appointments::availability(&state.db, parsed).await {
        Ok(availability) => {
            let notice = availability.notice.unwrap_or_default().to_string();
            let options = availability
                .slots
                .into_iter()
                .map(|value| SlotOption {
                    selected: value == selected,
                    value,
                })
                .collect();
            (options, notice)
        }
        Err(err) => {
            log::error!("Error fetching available times: {err}");
            (Vec::new(), slots::LOAD_FAILED_NOTICE.to_string())
        }
    }
}

async fn show_booking(
    state: web::Data<AppState>,
    query: web::Query<BookingQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let date = query.date.unwrap_or_default();
    let (slots, notice) = slot_options(&state, &date, "").await;

    Ok(render(BookingTemplate {
        offerings: catalog_with(query.service.as_deref().unwrap_or("")),
        form: BookingView {
            date,
            ..BookingView::default()
        },
        slots,
        errors: Vec::new(),
        notice,
        today: today(),
    }))
}

async fn available_slots(
    state: web::Data<AppState>,
    query: web::Query<SlotsQuery>,
) -> HttpResponse {
    let date = match slots::parse_date(&query.date) {
        Ok(date) => date,
        Err(err) => {
            log::warn!("Slot lookup rejected: {err}");
            return HttpResponse::BadRequest().json(json!({ "notice": err.notice() }));
        }
    };

    match appointments::availability(&state.db, date).await {
        Ok(availability) => HttpResponse::Ok().json(availability),
        Err(err) => {
            log::error!("Error fetching available times: {err}");
            HttpResponse::InternalServerError().json(json!({ "notice": slots::LOAD_FAILED_NOTICE }))
        }
    }
}

async fn create_booking(
    state: web::Data<AppState>,
    form: web::Form<BookingForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let time = form.time.unwrap_or_default();
    let request = NewAppointment {
        client_name: form.client_name.clone(),
        contact: form.contact.clone(),
        service_id: form.service_id.clone(),
        date: form.date.clone(),
        time: time.clone(),
    };

    let (status, err) = match appointments::book(&state.db, request).await {
        Ok(row) => {
            log::info!("Appointment {} booked for {} {}", row.id, row.date, row.time);
            state.publish(ServerEvent::from_appointment("appointment_booked", &row));
            return Ok(render(BookingSuccessTemplate {
                client_name: row.client_name,
                service_text: row.service_text,
                date: row.date,
                time: row.time,
            }));
        }
        Err(BookingError::Database(err)) => return Err(AppError::Database(err).into()),
        Err(err @ BookingError::SlotUnavailable(_)) => (StatusCode::CONFLICT, err),
        Err(err) => (StatusCode::BAD_REQUEST, err),
    };

    let (slots, notice) = slot_options(&state, &form.date, &time).await;
    Ok(render_with_status(
        status,
        BookingTemplate {
            offerings: catalog_with(&form.service_id),
            form: BookingView {
                client_name: form.client_name,
                contact: form.contact,
                date: form.date,
            },
            slots,
            errors: vec![err.to_string()],
            notice,
            today: today(),
        },
    ))
}

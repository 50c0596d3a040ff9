pub mod admin;
pub mod events;
pub mod member;
pub mod public;

use crate::models::{format_cents, BudgetStatus, ServiceOrder, ServiceStatus, ServiceType};

#[derive(Clone, Debug)]
pub struct ChoiceOption {
    pub value: &'static str,
    pub label: &'static str,
    pub selected: bool,
}

pub fn status_options(current: Option<ServiceStatus>) -> Vec<ChoiceOption> {
    ServiceStatus::ALL
        .into_iter()
        .map(|status| ChoiceOption {
            value: status.as_str(),
            label: status.label(),
            selected: current == Some(status),
        })
        .collect()
}

pub fn budget_options(current: Option<BudgetStatus>) -> Vec<ChoiceOption> {
    BudgetStatus::ALL
        .into_iter()
        .map(|status| ChoiceOption {
            value: status.as_str(),
            label: status.label(),
            selected: current == Some(status),
        })
        .collect()
}

pub fn service_type_options(current: Option<ServiceType>) -> Vec<ChoiceOption> {
    ServiceType::ALL
        .into_iter()
        .map(|service_type| ChoiceOption {
            value: service_type.as_str(),
            label: service_type.label(),
            selected: current == Some(service_type),
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct OrderView {
    pub id: String,
    pub client_name: String,
    pub phone: String,
    pub address: String,
    pub service_type: &'static str,
    pub due_date: String,
    pub status: &'static str,
    pub status_label: &'static str,
    pub budget: String,
    pub budget_status: &'static str,
    pub budget_status_label: &'static str,
    pub photos: Vec<String>,
    pub has_photos: bool,
    pub created_at: String,
    pub updated_at: String,
    pub status_options: Vec<ChoiceOption>,
    pub budget_options: Vec<ChoiceOption>,
}

pub fn to_view(order: ServiceOrder) -> OrderView {
    OrderView {
        id: order.id,
        client_name: order.client_name,
        phone: order.phone,
        address: order.address,
        service_type: order.service_type.label(),
        due_date: order.due_date,
        status: order.status.as_str(),
        status_label: order.status.label(),
        budget: format_cents(order.budget_cents),
        budget_status: order.budget_status.as_str(),
        budget_status_label: order.budget_status.label(),
        has_photos: !order.photos.is_empty(),
        photos: order.photos,
        created_at: order.created_at,
        updated_at: order.updated_at,
        status_options: status_options(Some(order.status)),
        budget_options: budget_options(Some(order.budget_status)),
    }
}

/// Only same-site paths are accepted as redirect targets.
pub fn safe_next<'a>(next: Option<&'a str>, fallback: &'a str) -> &'a str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => fallback,
    }
}

#[cfg(test)]
pub(crate) fn basic_auth(
    email: &str,
    password: &str,
) -> (
    actix_web::http::header::HeaderName,
    actix_web_httpauth::headers::authorization::Basic,
) {
    (
        actix_web::http::header::AUTHORIZATION,
        actix_web_httpauth::headers::authorization::Basic::new(
            email.to_string(),
            Some(password.to_string()),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::sample_order;

    #[test]
    fn view_marks_current_choices() {
        let mut order = sample_order("Ana Souza", "user-1");
        order.status = ServiceStatus::Active;
        let view = to_view(order);

        assert_eq!(view.budget, "150.00");
        assert_eq!(view.status, "active");
        let selected: Vec<_> = view
            .status_options
            .iter()
            .filter(|option| option.selected)
            .map(|option| option.value)
            .collect();
        assert_eq!(selected, vec!["active"]);
        assert!(!view.has_photos);
    }

    #[test]
    fn next_must_stay_on_site() {
        assert_eq!(safe_next(Some("/admin/services"), "/x"), "/admin/services");
        assert_eq!(safe_next(Some("//evil.example"), "/x"), "/x");
        assert_eq!(safe_next(Some("https://evil.example"), "/x"), "/x");
        assert_eq!(safe_next(None, "/x"), "/x");
    }
}

use crate::configuration::CallbackOptions;
use actix_http::HttpServiceBuilder;
use actix_server::ServerBuilder;
use actix_service::map_config;
use actix_web::{
    dev::{AppConfig, Service},
    http::{header, Method},
    web, App, HttpRequest, HttpResponse,
};
use anyhow::{Context, Result};
use restldap_domain_handlers::handler::RefreshHandler;
use secstr::SecUtf8;
use std::{sync::Arc, time::Duration};
use tracing::info;

pub const CALLBACK_PATH: &str = "/callback";

const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CLIENT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const KEEP_ALIVE: Duration = Duration::from_secs(120);

#[derive(thiserror::Error, Debug)]
pub enum CallbackError {
    #[error("Wrong HTTP method: `{0}`")]
    WrongMethod(Method),
    #[error("Unauthorized: `{0}`")]
    UnauthorizedError(String),
}

pub type CallbackResult<T> = std::result::Result<T, CallbackError>;

pub(crate) fn error_to_http_response(error: CallbackError) -> HttpResponse {
    match error {
        CallbackError::WrongMethod(_) => HttpResponse::BadRequest(),
        CallbackError::UnauthorizedError(_) => HttpResponse::Unauthorized(),
    }
    .body(error.to_string())
}

pub(crate) struct CallbackState {
    pub auth_token: SecUtf8,
    pub refresh_handler: Arc<dyn RefreshHandler>,
}

fn check_authorization(request: &HttpRequest, auth_token: &SecUtf8) -> CallbackResult<()> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| CallbackError::UnauthorizedError("Missing authorization header".into()))?
        .to_str()
        .map_err(|_| CallbackError::UnauthorizedError("Unreadable authorization header".into()))?;
    match header.strip_prefix("Token ") {
        Some(token) if SecUtf8::from(token) == *auth_token => Ok(()),
        _ => Err(CallbackError::UnauthorizedError("Wrong token".into())),
    }
}

fn handle_callback(request: &HttpRequest, state: &CallbackState) -> CallbackResult<()> {
    if request.method() != Method::HEAD {
        return Err(CallbackError::WrongMethod(request.method().clone()));
    }
    check_authorization(request, &state.auth_token)?;
    state.refresh_handler.refresh_now();
    Ok(())
}

async fn callback_handler(request: HttpRequest, state: web::Data<CallbackState>) -> HttpResponse {
    match handle_callback(&request, &state) {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => error_to_http_response(e),
    }
}

async fn redirect_to_callback() -> HttpResponse {
    HttpResponse::TemporaryRedirect()
        .insert_header((header::LOCATION, CALLBACK_PATH))
        .finish()
}

pub(crate) fn http_config(cfg: &mut web::ServiceConfig, state: web::Data<CallbackState>) {
    cfg.app_data(state)
        .service(web::resource(CALLBACK_PATH).route(web::route().to(callback_handler)))
        .default_service(web::route().to(redirect_to_callback));
}

pub fn build_callback_server(
    options: &CallbackOptions,
    refresh_handler: Arc<dyn RefreshHandler>,
    server_builder: ServerBuilder,
) -> Result<ServerBuilder> {
    let state = web::Data::new(CallbackState {
        auth_token: options.auth_token.clone(),
        refresh_handler,
    });
    info!("Starting the refresh callback on port {}", options.port);
    server_builder
        .bind(
            "callback",
            (options.host.clone(), options.port),
            move || {
                let state = state.clone();
                HttpServiceBuilder::default()
                    .client_request_timeout(CLIENT_REQUEST_TIMEOUT)
                    .client_disconnect_timeout(CLIENT_DISCONNECT_TIMEOUT)
                    .keep_alive(KEEP_ALIVE)
                    .finish(map_config(
                        App::new()
                            .wrap_fn(|request, service| {
                                let method = request.method().clone();
                                let path = request.path().to_string();
                                let peer = request
                                    .peer_addr()
                                    .map(|addr| addr.to_string())
                                    .unwrap_or_else(|| "unknown".to_string());
                                let response = service.call(request);
                                async move {
                                    let response = response.await?;
                                    info!(
                                        %method,
                                        %path,
                                        %peer,
                                        status = response.status().as_u16(),
                                        "Callback request"
                                    );
                                    Ok::<_, actix_web::Error>(response)
                                }
                            })
                            .configure(move |cfg| http_config(cfg, state)),
                        |_| AppConfig::default(),
                    ))
                    .tcp()
            },
        )
        .with_context(|| {
            format!(
                "While bringing up the callback server with port {}",
                options.port
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{
        http::StatusCode,
        test::{call_service, init_service, TestRequest},
    };
    use pretty_assertions::assert_eq;
    use restldap_test_utils::MockTestRefreshHandler;

    fn make_state(expected_refreshes: usize) -> web::Data<CallbackState> {
        let mut refresh_handler = MockTestRefreshHandler::new();
        refresh_handler
            .expect_refresh_now()
            .times(expected_refreshes)
            .return_const(());
        web::Data::new(CallbackState {
            auth_token: SecUtf8::from("s3cr3t"),
            refresh_handler: Arc::new(refresh_handler),
        })
    }

    async fn status_of(request: TestRequest, expected_refreshes: usize) -> StatusCode {
        let state = make_state(expected_refreshes);
        let app = init_service(App::new().configure(move |cfg| http_config(cfg, state))).await;
        call_service(&app, request.to_request()).await.status()
    }

    #[actix_web::test]
    async fn test_callback_refreshes() {
        let request = TestRequest::default()
            .method(Method::HEAD)
            .uri(CALLBACK_PATH)
            .insert_header((header::AUTHORIZATION, "Token s3cr3t"));
        assert_eq!(status_of(request, 1).await, StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_wrong_method() {
        let request = TestRequest::post()
            .uri(CALLBACK_PATH)
            .insert_header((header::AUTHORIZATION, "Token s3cr3t"));
        assert_eq!(status_of(request, 0).await, StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_wrong_token() {
        let request = TestRequest::default()
            .method(Method::HEAD)
            .uri(CALLBACK_PATH)
            .insert_header((header::AUTHORIZATION, "Token guess"));
        assert_eq!(status_of(request, 0).await, StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_missing_token() {
        let request = TestRequest::default()
            .method(Method::HEAD)
            .uri(CALLBACK_PATH);
        assert_eq!(status_of(request, 0).await, StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_other_path_redirects() {
        let state = make_state(0);
        let app = init_service(App::new().configure(move |cfg| http_config(cfg, state))).await;
        let response = call_service(&app, TestRequest::get().uri("/refresh").to_request()).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            CALLBACK_PATH
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CallbackError::WrongMethod(Method::GET).to_string(),
            "Wrong HTTP method: `GET`"
        );
    }
}

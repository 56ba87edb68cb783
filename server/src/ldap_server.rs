use crate::{configuration::Configuration, tls};
use actix_rt::net::TcpStream;
use actix_server::ServerBuilder;
use actix_service::{fn_service, ServiceFactoryExt};
use anyhow::{Context, Result};
use ldap3_proto::proto::LdapMsg;
use restldap_domain_handlers::handler::BackendHandler;
use restldap_ldap::{DirectoryCodec, DirectoryContext, LdapHandler, LdapRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Requests read ahead of the one being processed.
const PENDING_REQUESTS: usize = 16;

#[instrument(skip_all, level = "info", name = "LDAP request", fields(session_id = %session.session_uuid()))]
async fn handle_ldap_message<Backend, Writer>(
    request: Result<LdapRequest, std::io::Error>,
    resp: &mut Writer,
    session: &mut LdapHandler<Backend>,
    cancellation: &CancellationToken,
) -> Result<bool>
where
    Backend: BackendHandler,
    Writer: futures_util::Sink<LdapMsg> + Unpin,
    <Writer as futures_util::Sink<LdapMsg>>::Error: std::error::Error + Send + Sync + 'static,
{
    use futures_util::SinkExt;
    let LdapRequest { message: msg, controls } = request.context("while receiving LDAP op")?;
    debug!(?msg, ?controls);
    match session
        .handle_ldap_message(msg.op, &controls, cancellation)
        .await
    {
        None => return Ok(false),
        Some(result) => {
            if result.is_empty() {
                debug!("No response");
            }
            for response in result.into_iter() {
                debug!(?response);
                resp.send(LdapMsg {
                    msgid: msg.msgid,
                    op: response.op,
                    ctrl: response.controls,
                })
                .await
                .context("while sending a response: {:#}")?
            }

            resp.flush()
                .await
                .context("while flushing responses: {:#}")?
        }
    }
    Ok(true)
}

/// Serves one connection until the client unbinds or disconnects, or `shutdown` fires.
///
/// Requests are read while the previous one is processed, so that a disconnect
/// cancels the search in progress.
pub async fn handle_ldap_stream<Stream, Backend>(
    stream: Stream,
    context: Arc<DirectoryContext<Backend>>,
    shutdown: CancellationToken,
) -> Result<Stream>
where
    Backend: BackendHandler + 'static,
    Stream: tokio::io::AsyncRead + tokio::io::AsyncWrite + std::marker::Unpin,
{
    use tokio_stream::StreamExt;
    let (r, w) = tokio::io::split(stream);
    let mut requests = FramedRead::new(r, DirectoryCodec::default());
    let mut resp = FramedWrite::new(w, DirectoryCodec::default());

    let session_uuid = Uuid::new_v4();
    let mut session = LdapHandler::new(context, session_uuid);
    let connection = shutdown.child_token();
    let (sender, receiver) = mpsc::channel(PENDING_REQUESTS);

    info!("LDAP session start: {}", session_uuid);
    let reader = async {
        let sender = sender;
        loop {
            tokio::select! {
                _ = connection.cancelled() => break,
                msg = requests.next() => match msg {
                    Some(msg) => {
                        if sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("Client disconnected");
                        break;
                    }
                },
            }
        }
        connection.cancel();
    };
    let processor = async {
        let mut receiver = receiver;
        let result = async {
            while let Some(msg) = receiver.recv().await {
                if !handle_ldap_message(msg, &mut resp, &mut session, &connection)
                    .await
                    .context("while handling incoming messages")?
                {
                    break;
                }
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;
        connection.cancel();
        result
    };
    let ((), result) = tokio::join!(reader, processor);
    info!("LDAP session end: {}", session_uuid);
    result?;
    Ok(requests.into_inner().unsplit(resp.into_inner()))
}

pub fn build_ldap_server<Backend>(
    config: &Configuration,
    context: Arc<DirectoryContext<Backend>>,
    shutdown: CancellationToken,
    server_builder: ServerBuilder,
) -> Result<ServerBuilder>
where
    Backend: BackendHandler + 'static,
{
    let address = (config.ldap_host.clone(), config.ldap_port);
    if config.ldaps_options.enabled {
        let tls_context = (
            context,
            shutdown,
            tls::get_tls_acceptor(&config.ldaps_options)
                .context("while setting up the SSL certificate")?,
        );
        let tls_binder = move || {
            let tls_context = tls_context.clone();
            fn_service(move |stream: TcpStream| {
                let tls_context = tls_context.clone();
                async move {
                    let (context, shutdown, tls_acceptor) = tls_context;
                    let tls_stream = tls_acceptor.accept(stream).await?;
                    handle_ldap_stream(tls_stream, context, shutdown).await
                }
            })
            .map_err(|err: anyhow::Error| error!("[LDAPS] Service Error: {:#}", err))
        };

        info!("Starting the LDAPS server on port {}", config.ldap_port);
        server_builder
            .bind("ldaps", address, tls_binder)
            .with_context(|| format!("while binding to the port {}", config.ldap_port))
    } else {
        let plain_context = (context, shutdown);
        let binder = move || {
            let plain_context = plain_context.clone();
            fn_service(move |stream: TcpStream| {
                let plain_context = plain_context.clone();
                async move {
                    let (context, shutdown) = plain_context;
                    handle_ldap_stream(stream, context, shutdown).await
                }
            })
            .map_err(|err: anyhow::Error| error!("[LDAP] Service Error: {:#}", err))
        };

        info!("Starting the LDAP server on port {}", config.ldap_port);
        server_builder
            .bind("ldap", address, binder)
            .with_context(|| format!("while binding to the port {}", config.ldap_port))
    }
}

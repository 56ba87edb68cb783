use actix::prelude::*;
use restldap_domain::dit::DitSnapshot;
use restldap_domain_handlers::{
    error::Result,
    handler::{BackendHandler, RefreshHandler},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument};

/// Fetches the whole directory from the backend and swaps it in.
#[instrument(skip_all, level = "info", name = "Directory refresh")]
pub async fn refresh_snapshot<Backend: BackendHandler>(
    backend_handler: &Backend,
    dit: &DitSnapshot,
) -> Result<()> {
    let (users, groups) = backend_handler.get_data().await?;
    info!(
        users = users.len(),
        groups = groups.len(),
        "Fetched directory data"
    );
    dit.replace_users_and_groups(users, groups).await;
    Ok(())
}

/// Runs a refresh every `interval`, or earlier on [`RefreshNow`].
///
/// A request arriving while a refresh runs is served by one more refresh
/// right after it, since the running fetch may predate the change.
pub struct Refresher<Backend> {
    backend_handler: Arc<Backend>,
    dit: DitSnapshot,
    interval: Duration,
    timer: Option<SpawnHandle>,
    in_flight: bool,
    pending: bool,
}

impl<Backend: BackendHandler + 'static> Refresher<Backend> {
    pub fn new(backend_handler: Arc<Backend>, dit: DitSnapshot, interval: Duration) -> Self {
        Self {
            backend_handler,
            dit,
            interval,
            timer: None,
            in_flight: false,
            pending: false,
        }
    }

    fn schedule(&mut self, ctx: &mut Context<Self>) {
        if let Some(timer) = self.timer.take() {
            ctx.cancel_future(timer);
        }
        self.timer = Some(ctx.run_later(self.interval, |act, ctx| {
            act.timer = None;
            act.refresh(ctx);
        }));
    }

    fn refresh(&mut self, ctx: &mut Context<Self>) {
        if self.in_flight {
            debug!("Refresh already in progress, queueing another one");
            self.pending = true;
            return;
        }
        self.in_flight = true;
        let backend_handler = self.backend_handler.clone();
        let dit = self.dit.clone();
        let refresh = async move { refresh_snapshot(backend_handler.as_ref(), &dit).await };
        ctx.spawn(refresh.into_actor(self).map(|result, act, ctx| {
            if let Err(e) = result {
                error!("Error while refreshing the directory, keeping the previous data: {e:#}");
            }
            act.in_flight = false;
            if std::mem::take(&mut act.pending) {
                act.refresh(ctx);
            } else {
                act.schedule(ctx);
            }
        }));
    }
}

impl<Backend: BackendHandler + 'static> Actor for Refresher<Backend> {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Refreshing the directory every {:?}", self.interval);
        self.schedule(ctx);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct RefreshNow;

impl<Backend: BackendHandler + 'static> Handler<RefreshNow> for Refresher<Backend> {
    type Result = ();

    fn handle(&mut self, _: RefreshNow, ctx: &mut Self::Context) {
        // While a refresh runs, no timer is armed.
        if let Some(timer) = self.timer.take() {
            ctx.cancel_future(timer);
        }
        self.refresh(ctx);
    }
}

/// Handle on a [`Refresher`], usable from any thread.
#[derive(Clone)]
pub struct RefreshTrigger(Recipient<RefreshNow>);

impl RefreshTrigger {
    pub fn new(recipient: Recipient<RefreshNow>) -> Self {
        Self(recipient)
    }
}

impl RefreshHandler for RefreshTrigger {
    fn refresh_now(&self) {
        debug!("Requesting a refresh");
        self.0.do_send(RefreshNow);
    }
}

//! Query/response correlation
//!
//! At most one query is in flight. Its event and the controller it went to
//! form the active context; a response is only accepted if it echoes that
//! event on that controller's connection. Anything else is stale and
//! dropped. If no response arrives within the loading delay, a
//! "Loading..." placeholder replaces the previous results.

use lantern_ipc::{Action, ExtensionEvent, ExtensionResponse, FramerId, ResultItem};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::controller::Controller;
use crate::identity::ExtensionId;
use crate::timer::{TimerId, TimerKind, Timers};

pub const LOADING_TEXT: &str = "Loading...";

/// What the launcher window should do
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ShowResults {
        ext_id: ExtensionId,
        results: Vec<ResultItem>,
    },
    RunAction {
        ext_id: ExtensionId,
        action: Action,
    },
    Hide,
}

pub type UiEventSender = mpsc::UnboundedSender<UiEvent>;
pub type UiEventReceiver = mpsc::UnboundedReceiver<UiEvent>;

#[derive(Debug, Clone)]
struct ActiveQuery {
    event: ExtensionEvent,
    ext_id: ExtensionId,
    framer_id: FramerId,
    icon: Option<String>,
}

#[derive(Debug)]
pub struct Correlator {
    loading_delay: Duration,
    active: Option<ActiveQuery>,
    loading_timer: Option<TimerId>,
    ui: UiEventSender,
}

impl Correlator {
    pub fn new(loading_delay: Duration, ui: UiEventSender) -> Self {
        Self {
            loading_delay,
            active: None,
            loading_timer: None,
            ui,
        }
    }

    /// Send `event` through `controller` and make it the active query
    pub fn dispatch(
        &mut self,
        event: ExtensionEvent,
        controller: &mut Controller,
        timers: &mut Timers<TimerKind>,
    ) {
        self.cancel_loading(timers);
        self.active = Some(ActiveQuery {
            event: event.clone(),
            ext_id: controller.ext_id().clone(),
            framer_id: controller.framer_id(),
            icon: controller.icon(),
        });
        controller.trigger_event(event, timers);
        self.loading_timer = Some(timers.arm(self.loading_delay, TimerKind::Loading));
    }

    /// Show the placeholder; the query stays active
    pub fn on_loading_timer(&mut self, timer: TimerId) {
        if self.loading_timer != Some(timer) {
            return;
        }
        self.loading_timer = None;
        if let Some(active) = &self.active {
            let placeholder = ResultItem::new(LOADING_TEXT).with_icon(active.icon.clone());
            self.emit(UiEvent::ShowResults {
                ext_id: active.ext_id.clone(),
                results: vec![placeholder],
            });
        }
    }

    /// Deliver a response received on `framer_id`; returns whether it was
    /// accepted
    pub fn on_response(
        &mut self,
        framer_id: FramerId,
        response: ExtensionResponse,
        timers: &mut Timers<TimerKind>,
    ) -> bool {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.framer_id == framer_id && active.event == response.event);
        if !matches {
            warn!(
                "Dropping stale response on {} for {:?}",
                framer_id, response.event
            );
            return false;
        }

        self.cancel_loading(timers);
        let Some(active) = self.active.take() else {
            return false;
        };

        match response.action {
            Action::RenderResults { results } => self.emit(UiEvent::ShowResults {
                ext_id: active.ext_id,
                results,
            }),
            action => {
                let keep_open = action.keeps_window_open();
                self.emit(UiEvent::RunAction {
                    ext_id: active.ext_id,
                    action,
                });
                if !keep_open {
                    self.emit(UiEvent::Hide);
                }
            }
        }
        true
    }

    /// The user changed or cleared the query
    pub fn on_query_changed(&mut self, timers: &mut Timers<TimerKind>) {
        self.cancel_loading(timers);
        if let Some(active) = self.active.take() {
            debug!("Query for extension {} abandoned", active.ext_id);
        }
    }

    /// A controller went away; forget its query
    pub fn forget(&mut self, framer_id: FramerId, timers: &mut Timers<TimerKind>) {
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.framer_id == framer_id)
        {
            self.on_query_changed(timers);
        }
    }

    pub fn active_event(&self) -> Option<&ExtensionEvent> {
        self.active.as_ref().map(|active| &active.event)
    }

    pub fn active_extension(&self) -> Option<&ExtensionId> {
        self.active.as_ref().map(|active| &active.ext_id)
    }

    fn cancel_loading(&mut self, timers: &mut Timers<TimerKind>) {
        if let Some(timer) = self.loading_timer.take() {
            timers.cancel(timer);
        }
    }

    fn emit(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            debug!("UI receiver is gone, dropping event");
        }
    }
}

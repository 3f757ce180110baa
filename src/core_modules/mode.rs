// THEORY:
// The `ModeController` is a two-state machine that decides which capability
// receives camera frames. It lives on the presentation context, because the
// only things that move it are user actions: a touch on a detected page, or
// the reset control.
//
// The frame-delivery context needs to know the current mode without locking
// anything, so the controller publishes every change on a `watch` channel.
// A transition into Tracking carries the acquired observation with it; the
// dispatch loop hands it to the tracking capability before the next frame.

use crate::core_modules::geometry::{CoordinateSpace, Point};
use crate::core_modules::overlay::{Observation, OverlayModel};
use tokio::sync::watch;
use tracing::info;

/// Which capability is consuming frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Scanning,
    Tracking,
}

/// What the frame-delivery context sees: the mode plus, when tracking, the target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModeState {
    pub mode: Mode,
    pub target: Option<Observation>,
}

/// The outcome of feeding a user action to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Scanning -> Tracking on the given observation.
    Acquired(Observation),
    /// Tracking -> Scanning.
    Reset,
    Unchanged,
}

pub struct ModeController {
    state_tx: watch::Sender<ModeState>,
    reset_visible: bool,
    acquired_message: String,
    reset_message: String,
}

impl ModeController {
    pub fn new(acquired_message: impl Into<String>, reset_message: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ModeState::default());
        Self {
            state_tx,
            reset_visible: false,
            acquired_message: acquired_message.into(),
            reset_message: reset_message.into(),
        }
    }

    /// A receiver for the frame-delivery context.
    pub fn subscribe(&self) -> watch::Receiver<ModeState> {
        self.state_tx.subscribe()
    }

    pub fn mode(&self) -> Mode {
        self.state_tx.borrow().mode
    }

    pub fn reset_visible(&self) -> bool {
        self.reset_visible
    }

    /// Handles a touch. Only a touch inside a current observation while scanning moves the machine.
    pub fn on_touch(
        &mut self,
        overlay: &mut OverlayModel,
        point: Point,
        space: CoordinateSpace,
    ) -> Transition {
        if self.mode() != Mode::Scanning {
            return Transition::Unchanged;
        }
        let Some(target) = overlay.hit_test(point, space).cloned() else {
            return Transition::Unchanged;
        };

        info!(x = point.x, y = point.y, "target acquired");
        self.state_tx.send_replace(ModeState {
            mode: Mode::Tracking,
            target: Some(target.clone()),
        });
        overlay.set_message(self.acquired_message.clone());
        self.reset_visible = true;
        Transition::Acquired(target)
    }

    /// Handles the reset control. A no-op while already scanning.
    pub fn reset(&mut self, overlay: &mut OverlayModel) -> Transition {
        if self.mode() != Mode::Tracking {
            return Transition::Unchanged;
        }

        info!("tracking reset, back to scanning");
        self.state_tx.send_replace(ModeState::default());
        overlay.set_message(self.reset_message.clone());
        self.reset_visible = false;
        Transition::Reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::geometry::Quadrilateral;
    use crate::core_modules::transform::Viewport;

    fn overlay_with_page() -> OverlayModel {
        let mut overlay = OverlayModel::new(Viewport::default());
        let quad = Quadrilateral::new(
            Point::new(0.2, 0.8),
            Point::new(0.8, 0.8),
            Point::new(0.8, 0.2),
            Point::new(0.2, 0.2),
        );
        overlay.add_quad(quad);
        overlay.add_observation(Observation::new(quad));
        overlay
    }

    fn controller() -> ModeController {
        ModeController::new("Target acquired", "Scanning")
    }

    #[test]
    fn starts_scanning_with_reset_hidden() {
        let c = controller();
        assert_eq!(c.mode(), Mode::Scanning);
        assert!(!c.reset_visible());
        assert_eq!(*c.subscribe().borrow(), ModeState::default());
    }

    #[test]
    fn touch_inside_acquires() {
        let mut c = controller();
        let mut overlay = overlay_with_page();
        let rx = c.subscribe();

        let t = c.on_touch(&mut overlay, Point::new(0.5, 0.5), CoordinateSpace::DisplayNormalized);

        assert!(matches!(t, Transition::Acquired(_)));
        assert_eq!(c.mode(), Mode::Tracking);
        assert!(c.reset_visible());
        assert_eq!(overlay.message(), "Target acquired");
        assert_eq!(overlay.quads().len(), 1);
        let published = rx.borrow().clone();
        assert_eq!(published.mode, Mode::Tracking);
        assert_eq!(published.target, Some(overlay.observations()[0].clone()));
    }

    #[test]
    fn touch_outside_is_ignored() {
        let mut c = controller();
        let mut overlay = overlay_with_page();
        overlay.set_message("Scanning...");

        let corner = Point::new(0.05, 0.95);
        let t = c.on_touch(&mut overlay, corner, CoordinateSpace::DisplayNormalized);

        assert_eq!(t, Transition::Unchanged);
        assert_eq!(c.mode(), Mode::Scanning);
        assert_eq!(overlay.message(), "Scanning...");
    }

    #[test]
    fn touches_while_tracking_do_nothing() {
        let mut c = controller();
        let mut overlay = overlay_with_page();
        c.on_touch(&mut overlay, Point::new(0.5, 0.5), CoordinateSpace::DisplayNormalized);

        for p in [Point::new(0.5, 0.5), Point::new(0.01, 0.01)] {
            let t = c.on_touch(&mut overlay, p, CoordinateSpace::DisplayNormalized);
            assert_eq!(t, Transition::Unchanged);
            assert_eq!(c.mode(), Mode::Tracking);
        }
    }

    #[test]
    fn reset_returns_to_scanning() {
        let mut c = controller();
        let mut overlay = overlay_with_page();
        assert_eq!(c.reset(&mut overlay), Transition::Unchanged);

        c.on_touch(&mut overlay, Point::new(0.5, 0.5), CoordinateSpace::DisplayNormalized);
        assert_eq!(c.reset(&mut overlay), Transition::Reset);

        assert_eq!(c.mode(), Mode::Scanning);
        assert!(!c.reset_visible());
        assert_eq!(overlay.message(), "Scanning");
        assert!(c.subscribe().borrow().target.is_none());
    }
}

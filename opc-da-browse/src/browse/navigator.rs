use crate::browse::path_cache::BrowsePath;
use crate::connector::{AddressSpace, BrowseDirection};
use crate::errors::{E_FAIL, OpcError, OpcResult};
use std::rc::Rc;

/// What the client believes about the server-side browse cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorState {
    /// Branch the remote cursor sits on.
    pub path: BrowsePath,
    /// The last resolved target was a leaf. The cursor then sits on its parent.
    pub target_is_leaf: bool,
    /// `false` when `path` can no longer be trusted: after a failed move, or
    /// after a `BROWSE_TO` by identifier whose resulting path is unknown.
    pub synced: bool,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            path: BrowsePath::root(),
            target_is_leaf: false,
            synced: true,
        }
    }
}

/// Owns the cursor belief and every call that moves the remote cursor.
pub struct CursorNavigator {
    space: Rc<dyn AddressSpace>,
    state: CursorState,
    max_root_ascent: usize,
}

impl CursorNavigator {
    /// A fresh binding starts at the root.
    pub fn new(space: Rc<dyn AddressSpace>, max_root_ascent: usize) -> Self {
        Self {
            space,
            state: CursorState::default(),
            max_root_ascent,
        }
    }

    pub fn space(&self) -> &Rc<dyn AddressSpace> {
        &self.space
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// Forget the believed position. The next move starts with a root reset.
    pub fn invalidate(&mut self) {
        self.state.synced = false;
    }

    pub(crate) fn set_leaf_target(&mut self, is_leaf: bool) {
        self.state.target_is_leaf = is_leaf;
    }

    /// Repositions the remote cursor on `target` with the fewest moves.
    ///
    /// Ascends from the current path to the longest common prefix, then
    /// descends the rest of `target`. If the incremental walk fails the
    /// cursor is reset to the root and the whole of `target` is replayed.
    pub fn move_to(&mut self, target: &BrowsePath) -> OpcResult<()> {
        self.state.target_is_leaf = false;
        if !self.state.synced {
            return self.replay(target);
        }

        let common = self.state.path.common_prefix_len(target);
        match self.walk(common, target) {
            Ok(()) => {
                self.state.path = target.clone();
                Ok(())
            }
            Err(e) if e.is_transport() => {
                self.state.synced = false;
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    from = %self.state.path,
                    to = %target,
                    "Incremental navigation failed, replaying from root"
                );
                self.replay(target)
            }
        }
    }

    fn walk(&mut self, common: usize, target: &BrowsePath) -> OpcResult<()> {
        while self.state.path.len() > common {
            self.move_up()?;
        }
        for segment in &target.segments()[common..] {
            self.move_down(segment)?;
        }
        Ok(())
    }

    /// Root reset followed by a descent of every segment of `target`.
    fn replay(&mut self, target: &BrowsePath) -> OpcResult<()> {
        self.move_to_root()?;
        for segment in target.segments() {
            self.move_down(segment)?;
        }
        Ok(())
    }

    /// Puts the remote cursor on the root.
    ///
    /// Tries `BROWSE_TO ""` first. Servers that reject it are walked up until
    /// `UP` answers `E_FAIL`, which marks the root; any other fault is
    /// propagated and leaves the cursor unsynced.
    pub fn move_to_root(&mut self) -> OpcResult<()> {
        match self.space.change_position(BrowseDirection::To("")) {
            Ok(()) => {
                self.arrived_at_root();
                return Ok(());
            }
            Err(e) if e.is_transport() => {
                self.state.synced = false;
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(error = %e, "BROWSE_TO root rejected, ascending with UP");
            }
        }

        for _ in 0..self.max_root_ascent {
            match self.space.change_position(BrowseDirection::Up) {
                Ok(()) => {}
                Err(OpcError::Protocol { code: E_FAIL, .. }) => {
                    self.arrived_at_root();
                    return Ok(());
                }
                Err(e) => {
                    self.state.synced = false;
                    return Err(e);
                }
            }
        }

        tracing::warn!(
            max_root_ascent = self.max_root_ascent,
            "Root not signalled after maximum UP moves, assuming root"
        );
        self.arrived_at_root();
        Ok(())
    }

    fn arrived_at_root(&mut self) {
        self.state.path = BrowsePath::root();
        self.state.synced = true;
    }

    /// One level down into the child branch `name`.
    pub fn move_down(&mut self, name: &str) -> OpcResult<()> {
        if let Err(e) = self.space.change_position(BrowseDirection::Down(name)) {
            self.state.synced = false;
            return Err(e);
        }
        self.state.path.push(name);
        Ok(())
    }

    /// One level up.
    pub fn move_up(&mut self) -> OpcResult<()> {
        if let Err(e) = self.space.change_position(BrowseDirection::Up) {
            self.state.synced = false;
            return Err(e);
        }
        self.state.path.pop();
        Ok(())
    }

    /// `BROWSE_TO` a fully qualified identifier.
    ///
    /// The server does not say where that lands in path terms, so the
    /// belief is left unsynced either way.
    pub fn browse_to(&mut self, item_id: &str) -> OpcResult<()> {
        self.state.synced = false;
        self.state.target_is_leaf = false;
        self.space.change_position(BrowseDirection::To(item_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browse::testing::{Call, FakeAddressSpace, RPC_S_SERVER_UNAVAILABLE, plant};
    use crate::errors::E_INVALIDARG;

    fn path(segments: &[&str]) -> BrowsePath {
        BrowsePath::from_segments(segments.iter().copied()).unwrap()
    }

    fn navigator(space: &Rc<FakeAddressSpace>) -> CursorNavigator {
        CursorNavigator::new(Rc::clone(space) as Rc<dyn AddressSpace>, 1000)
    }

    #[test]
    fn test_move_to_current_path_issues_no_calls() {
        let space = Rc::new(plant());
        let mut nav = navigator(&space);
        nav.move_to(&BrowsePath::root()).unwrap();
        assert!(space.calls().is_empty());

        nav.move_to(&path(&["Channel1", "Device1"])).unwrap();
        space.clear_calls();
        nav.move_to(&path(&["channel1", "DEVICE1"])).unwrap();
        assert!(space.calls().is_empty());
    }

    #[test]
    fn test_move_to_uses_common_prefix() {
        let space = Rc::new(plant());
        let mut nav = navigator(&space);
        nav.move_to(&path(&["Channel1", "Device1", "Alarms"])).unwrap();
        space.clear_calls();

        nav.move_to(&path(&["Channel1", "Device2"])).unwrap();
        assert_eq!(
            space.calls(),
            vec![Call::Up, Call::Up, Call::Down("Device2".into())]
        );
        assert_eq!(space.cursor(), ["Channel1", "Device2"]);
        assert_eq!(nav.state().path, path(&["Channel1", "Device2"]));
    }

    #[test]
    fn test_pure_ascent_and_pure_descent() {
        let space = Rc::new(plant());
        let mut nav = navigator(&space);
        nav.move_to(&path(&["Channel1", "Device1", "Alarms"])).unwrap();
        assert_eq!((space.ups(), space.downs()), (0, 3));
        space.clear_calls();

        nav.move_to(&path(&["Channel1"])).unwrap();
        assert_eq!((space.ups(), space.downs()), (2, 0));
    }

    #[test]
    fn test_failed_walk_replays_from_root() {
        let space = Rc::new(plant());
        let mut nav = navigator(&space);
        nav.move_to(&path(&["Channel1", "Device1"])).unwrap();
        space.fail(Call::Down("Device2".into()), E_INVALIDARG, 1);
        space.clear_calls();

        nav.move_to(&path(&["Channel1", "Device2"])).unwrap();
        assert_eq!(
            space.calls(),
            vec![
                Call::Up,
                Call::Down("Device2".into()),
                Call::To(String::new()),
                Call::Down("Channel1".into()),
                Call::Down("Device2".into()),
            ]
        );
        assert_eq!(space.cursor(), ["Channel1", "Device2"]);
        assert!(nav.state().synced);
    }

    #[test]
    fn test_replay_failure_is_surfaced_and_leaves_cursor_unsynced() {
        let space = Rc::new(plant());
        let mut nav = navigator(&space);
        let err = nav.move_to(&path(&["Channel1", "Nope"])).unwrap_err();
        assert!(err.is_protocol());
        assert!(!nav.state().synced);

        space.clear_calls();
        nav.move_to(&path(&["Channel2"])).unwrap();
        assert_eq!(space.calls()[0], Call::To(String::new()), "resets before walking");
    }

    #[test]
    fn test_move_to_root_falls_back_to_up_until_e_fail() {
        let space = Rc::new(plant().without_browse_to_root());
        space.set_cursor(&["Channel1", "Device1", "Alarms"]);
        let mut nav = navigator(&space);
        nav.invalidate();

        nav.move_to_root().unwrap();
        assert!(space.cursor().is_empty());
        // three successful ascents plus the one that signals the root
        assert_eq!(space.ups(), 4);
        assert!(nav.state().synced && nav.state().path.is_root());
    }

    #[test]
    fn test_move_to_root_propagates_other_faults() {
        let space = Rc::new(plant().without_browse_to_root());
        space.set_cursor(&["Channel1"]);
        space.fail(Call::Up, E_INVALIDARG, 1);
        let mut nav = navigator(&space);

        let err = nav.move_to_root().unwrap_err();
        assert_eq!(err.code(), Some(E_INVALIDARG));
        assert!(!nav.state().synced);
    }

    #[test]
    fn test_move_to_root_ascent_is_bounded() {
        let space = Rc::new(plant().without_browse_to_root());
        space.set_cursor(&["Channel1", "Device1", "Alarms"]);
        let mut nav = CursorNavigator::new(Rc::clone(&space) as Rc<dyn AddressSpace>, 2);

        nav.move_to_root().unwrap();
        assert_eq!(space.ups(), 2);
    }

    #[test]
    fn test_transport_fault_is_not_replayed() {
        let space = Rc::new(plant());
        let mut nav = navigator(&space);
        space.fail(Call::Down("Channel1".into()), RPC_S_SERVER_UNAVAILABLE, 1);

        let err = nav.move_to(&path(&["Channel1"])).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(space.calls().len(), 1);
        assert!(!nav.state().synced);
    }

    #[test]
    fn test_browse_to_unsyncs_belief() {
        let space = Rc::new(plant());
        let mut nav = navigator(&space);
        nav.browse_to("Channel1.Device1").unwrap();
        assert_eq!(space.cursor(), ["Channel1", "Device1"]);
        assert!(!nav.state().synced);
    }
}

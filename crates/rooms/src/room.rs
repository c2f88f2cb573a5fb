use engine::{random_hsl, CellularEngine, Generation};
use rand::Rng;
use shared::{
    domain::{
        Cell, ConnectionId, Dimension, Guest, Member, Player, Position, RoomStatus,
        SimulationState,
    },
    error::CoreError,
};

/// One shared board and the people looking at it.
#[derive(Debug, Clone)]
pub struct Room {
    name: String,
    players: Vec<Player>,
    guests: Vec<Guest>,
    engine: CellularEngine,
    simulation_frame: u64,
    running: bool,
    epoch: u64,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            players: Vec::new(),
            guests: Vec::new(),
            engine: CellularEngine::new(),
            simulation_frame: 0,
            running: false,
            epoch: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds `id` to the roster. Entrants become guests while a simulation runs and players
    /// with a fresh random color otherwise. Joining twice returns the existing member.
    pub fn join<R: Rng + ?Sized>(&mut self, id: ConnectionId, rng: &mut R) -> Member {
        if let Some(existing) = self.member(&id) {
            return existing;
        }
        if self.running {
            let guest = Guest { id };
            self.guests.push(guest.clone());
            Member::Guest(guest)
        } else {
            let player = Player {
                id,
                appearance: random_hsl(rng),
                request_start_simulation: false,
            };
            self.players.push(player.clone());
            Member::Player(player)
        }
    }

    pub fn leave(&mut self, id: &ConnectionId) -> Option<Member> {
        if let Some(index) = self.players.iter().position(|player| &player.id == id) {
            return Some(Member::Player(self.players.remove(index)));
        }
        let index = self.guests.iter().position(|guest| &guest.id == id)?;
        Some(Member::Guest(self.guests.remove(index)))
    }

    pub fn member(&self, id: &ConnectionId) -> Option<Member> {
        self.player(id)
            .cloned()
            .map(Member::Player)
            .or_else(|| {
                self.guests
                    .iter()
                    .find(|guest| &guest.id == id)
                    .cloned()
                    .map(Member::Guest)
            })
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.member(id).is_some()
    }

    pub fn player(&self, id: &ConnectionId) -> Option<&Player> {
        self.players.iter().find(|player| &player.id == id)
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn guests(&self) -> &[Guest] {
        &self.guests
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.guests.is_empty()
    }

    pub fn status(&self) -> RoomStatus {
        RoomStatus {
            players: self.players.clone(),
            guests: self.guests.clone(),
        }
    }

    /// Records a player's start/stop vote and returns the updated player.
    pub fn set_vote(&mut self, id: &ConnectionId, request: bool) -> Result<Player, CoreError> {
        if let Some(player) = self.players.iter_mut().find(|player| &player.id == id) {
            player.request_start_simulation = request;
            return Ok(player.clone());
        }
        if self.guests.iter().any(|guest| &guest.id == id) {
            return Err(CoreError::capability("guests cannot vote"));
        }
        Err(CoreError::not_a_member(format!(
            "{id} is not a member of `{}`",
            self.name
        )))
    }

    /// At least one player, and every player asked to run.
    pub fn is_running_eligible(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .iter()
                .all(|player| player.request_start_simulation)
    }

    pub fn state(&self) -> SimulationState {
        if self.running {
            SimulationState::Running
        } else if self
            .players
            .iter()
            .any(|player| player.request_start_simulation)
        {
            SimulationState::WaitingForUnanimity
        } else {
            SimulationState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Identifies the current run. A tick loop holding an older epoch must exit.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Enters the running state with the frame counter reset. Returns the new run's epoch.
    pub fn start(&mut self) -> u64 {
        self.running = true;
        self.simulation_frame = 0;
        self.epoch += 1;
        self.epoch
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn simulation_frame(&self) -> u64 {
        self.simulation_frame
    }

    /// Steps the board once and bumps the frame counter.
    pub fn advance(&mut self) -> Generation {
        let generation = self.engine.step();
        self.simulation_frame += 1;
        generation
    }

    pub fn add_living_cells(
        &mut self,
        player_id: &ConnectionId,
        positions: &[Position],
    ) -> Result<usize, CoreError> {
        let appearance = self.editor(player_id)?.appearance;
        Ok(self.engine.add_living_cells(
            positions
                .iter()
                .map(|&position| Cell::living(position, appearance)),
        ))
    }

    pub fn remove_living_cells(
        &mut self,
        player_id: &ConnectionId,
        positions: &[Position],
    ) -> Result<usize, CoreError> {
        self.editor(player_id)?;
        Ok(self.engine.remove_living_cells(positions.iter().copied()))
    }

    fn editor(&self, id: &ConnectionId) -> Result<&Player, CoreError> {
        let player = self.player(id).ok_or_else(|| {
            CoreError::capability(format!("{id} is not a player of `{}`", self.name))
        })?;
        if self.running {
            return Err(CoreError::capability("board is locked while running"));
        }
        Ok(player)
    }

    pub fn current_living_cells(&self) -> Vec<Cell> {
        self.engine.current_living_cells()
    }

    pub fn dimension(&self) -> Dimension {
        self.engine.dimension()
    }

    pub fn engine(&self) -> &CellularEngine {
        &self.engine
    }
}

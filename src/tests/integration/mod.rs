mod delivery;
mod enrollment_flow;
mod unsubscribe;

use diesel::connection::{Instrumentation, InstrumentationEvent};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::*;
use tracing::{debug, warn};

use crate::config;
use crate::errors::Error;


pub type PgPool = Pool<ConnectionManager<PgConnection>>;


pub fn get_pool() -> Result<PgPool, Error> {
    let url = config::database_url();
    let manager = ConnectionManager::<PgConnection>::new(url);
    let pool = Pool::builder().max_size(config::pool_size()).build(manager)?;
    Ok(pool)
}


/// Emits every finished query as a tracing event. Wired up in main with
/// diesel's default instrumentation hook.
pub fn simple_logger() -> Option<Box<dyn Instrumentation>> {
    Some(Box::new(|event: InstrumentationEvent<'_>| {
        if let InstrumentationEvent::FinishQuery { query, error, .. } = event {
            match error {
                None => debug!(query = %query, "query finished"),
                Some(err) => warn!(query = %query, ?err, "query failed"),
            }
        }
    }))
}


/// Applies the configured invocation deadline to the current transaction.
/// Postgres aborts any statement that overruns it, which in turn rolls the
/// whole load back through the normal error path.
pub fn apply_deadline(conn: &mut PgConnection) -> Result<(), Error> {
    let millis = config::deadline().as_millis();
    diesel::sql_query(format!("SET LOCAL statement_timeout = {millis}")).execute(conn)?;
    Ok(())
}

use chrono::{DateTime, TimeZone, Utc};

use crate::context::{Clock, Context};
use crate::db::Store;
use crate::directory::{register_application, register_company, Application, Company};
use crate::recurrence::Recurrence;
use crate::templates::{self, NewRunTemplate};
use crate::time;
use crate::types::RunTemplate;
use runq_core::TemplateId;

pub(crate) fn t(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

pub(crate) struct Fixture {
    pub ctx: Context,
    pub app: Application,
    pub company: Company,
}

/// Fresh in-memory store with one application and one company, clock pinned.
pub(crate) fn fixture(now: DateTime<Utc>) -> Fixture {
    let ctx = Context::new(Store::open_in_memory().unwrap()).with_clock(Clock::Fixed(now));
    let app = register_application(&ctx, "Alpha", None).unwrap();
    let company = register_company(&ctx, "Acme", "acme").unwrap();
    Fixture { ctx, app, company }
}

pub(crate) fn new_template(fx: &Fixture, name: &str, recurrence: &str) -> RunTemplate {
    templates::create(
        &fx.ctx,
        NewRunTemplate::new(name, fx.app.id, fx.company.id)
            .recurrence(Recurrence::parse(recurrence).unwrap()),
    )
    .unwrap()
}

pub(crate) fn count(ctx: &Context, sql: &str) -> i64 {
    ctx.store().lock().unwrap().query_row(sql, [], |r| r.get(0)).unwrap()
}

pub(crate) fn exec(ctx: &Context, sql: &str) {
    ctx.store().lock().unwrap().execute_batch(sql).unwrap();
}

pub(crate) fn set_next_schedule(fx: &Fixture, id: TemplateId, at: DateTime<Utc>) {
    fx.ctx
        .store()
        .lock()
        .unwrap()
        .execute(
            "UPDATE runtemplate SET next_schedule = ?1 WHERE id = ?2",
            rusqlite::params![time::to_db(at), id.get()],
        )
        .unwrap();
}

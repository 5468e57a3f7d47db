use rocket::launch;

#[launch]
fn rocket() -> _ {
    mail_ledger::rocket()
}

use ppp_otp::policy::Policy;
use ppp_otp::session::Session;
use ppp_otp::store::user_file::UserFileStore;

fn main() {
    let home = std::env::temp_dir().join("ppp-otp-demo-bob");
    std::fs::create_dir_all(&home).unwrap();

    let store = UserFileStore::new(&home);
    let policy = Policy::default();

    println!("Generating a new sequence key for Bob");
    let mut session = Session::new(&store, &policy);
    session.generate_key("bob", false, false).unwrap();
    session.release(true, false).unwrap();
    println!("This is a one time action, normally this happens through a setup tool");
    println!();
    println!("Next authentication process: `cargo run --example 02_authentication`");
}

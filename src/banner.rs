// src/banner.rs

/// Prints the application startup banner to the console.
pub fn print_banner() {
    let banner = r#"
 _____    _      _____     _ _
| ____|__| |_   |_   _|_ _| | | _____
|  _| / _` | | | || |/ _` | | |/ / __|
| |__| (_| | |_| || | (_| | |   <\__ \
|_____\__,_|\__,_||_|\__,_|_|_|\_\___/

    Assessment & Subscription Flows
"#;
    println!("{}", banner);
}

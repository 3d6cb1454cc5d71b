//! `storefront-cli`: command-line shop front for the storefront API.
//!
//! Startup sequence:
//! 1. Parse arguments, load [`ClientConfig`] from the environment and apply overrides.
//! 2. Initialise structured JSON logging on stderr.
//! 3. Run the requested command against the API.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use common::protocol::{
    Bouquet, BouquetQuery, Order, PartnerApplicationRequest, RegisterRequest,
};
use serde::Serialize;
use storefront_client::{
    cart::Cart, config::ClientConfig, telemetry, ApiClient, ClientError, Delivery,
};

/// Exit status when the command needs a signed-in session.
const EXIT_LOGIN_REQUIRED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "storefront-cli", version, about = "Browse, buy and manage flower orders")]
struct Cli {
    /// Base URL of the storefront API.
    #[arg(long, global = true, env = "STOREFRONT_API_URL")]
    api_url: Option<String>,

    /// Directory holding the session and cart.
    #[arg(long, global = true, env = "STOREFRONT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a customer account and sign in.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Sign in.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out and empty the cart.
    Logout,
    /// Show the signed-in account.
    Me,
    /// List occasions.
    Occasions,
    /// Search bouquets.
    Bouquets(BouquetArgs),
    /// Show one bouquet.
    Bouquet { id: i64 },
    /// Inspect or change the cart.
    #[command(subcommand)]
    Cart(CartCommand),
    /// Place an order for the cart.
    Checkout(CheckoutArgs),
    /// Capture the approved payment of an order.
    Capture { order_id: i64 },
    /// List your orders.
    Orders,
    /// Show one order.
    Order { id: i64 },
    /// Apply to become a delivery partner.
    Apply {
        #[arg(long)]
        business_name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List your partner applications.
    Applications,
}

#[derive(Debug, Args)]
struct BouquetArgs {
    #[arg(long)]
    occasion: Option<i64>,
    #[arg(long)]
    search: Option<String>,
    /// Include bouquets that cannot be ordered right now.
    #[arg(long)]
    all: bool,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    page_size: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum CartCommand {
    Show,
    Add {
        bouquet_id: i64,
        #[arg(default_value_t = 1)]
        quantity: u32,
    },
    /// Set a quantity; 0 removes the line.
    Set { bouquet_id: i64, quantity: u32 },
    Remove { bouquet_id: i64 },
    Clear,
}

#[derive(Debug, Args)]
struct CheckoutArgs {
    #[arg(long)]
    recipient: String,
    #[arg(long)]
    address: String,
    /// Delivery date, YYYY-MM-DD.
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<ClientError>() {
            Some(ClientError::LoginRequired) => {
                eprintln!("Please sign in first: storefront-cli login --email <email> --password <password>");
                ExitCode::from(EXIT_LOGIN_REQUIRED)
            }
            _ => {
                eprintln!("ERROR: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    let cfg = ClientConfig::load_env()?.with_overrides(cli.api_url, cli.state_dir);
    cfg.validate()?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Command
    // -----------------------------------------------------------------------
    let api = ApiClient::new(&cfg)?;
    execute(&api, cli.command).await
}

async fn execute(api: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Register {
            email,
            password,
            name,
            phone,
        } => {
            let req = RegisterRequest {
                email,
                password,
                full_name: name,
                phone,
            };
            let user = api.register(&req).await?;
            println!("Welcome, {}! Signed in as {}.", user.full_name, user.email);
        }
        Command::Login { email, password } => {
            let user = api.login(&email, &password).await?;
            println!("Signed in as {} ({}).", user.email, user.role);
        }
        Command::Logout => {
            api.logout().await?;
            println!("Signed out.");
        }
        Command::Me => print_json(&api.me().await?)?,
        Command::Occasions => {
            for o in api.occasions().await? {
                println!("{:>4}  {}", o.id, o.name);
            }
        }
        Command::Bouquets(args) => {
            let query = BouquetQuery {
                occasion_id: args.occasion,
                search: args.search,
                available_only: (!args.all).then_some(true),
                page: args.page,
                page_size: args.page_size,
            };
            let page = api.bouquets(&query).await?;
            for b in &page.items {
                print_bouquet_row(b);
            }
            println!(
                "page {} ({} per page), {} bouquets in total",
                page.page, page.page_size, page.total
            );
        }
        Command::Bouquet { id } => print_json(&api.bouquet(id).await?)?,
        Command::Cart(cmd) => {
            let cart = match cmd {
                CartCommand::Show => api.carts().load()?,
                CartCommand::Add {
                    bouquet_id,
                    quantity,
                } => api.add_to_cart(bouquet_id, quantity).await?,
                CartCommand::Set {
                    bouquet_id,
                    quantity,
                } => api.carts().set_quantity(bouquet_id, quantity)?,
                CartCommand::Remove { bouquet_id } => api.carts().remove(bouquet_id)?,
                CartCommand::Clear => {
                    api.carts().clear()?;
                    Cart::default()
                }
            };
            print_cart(&cart);
        }
        Command::Checkout(args) => {
            let delivery = Delivery {
                recipient_name: args.recipient,
                delivery_address: args.address,
                delivery_date: args.date,
                card_message: args.message,
            };
            let resp = api.checkout(&delivery).await?;
            println!(
                "Order #{} placed: {} {}.",
                resp.order_id,
                money(resp.total_cents),
                resp.currency
            );
            if let Some(url) = resp.approve_url {
                println!("Approve the payment at {url}");
            }
            println!("Then run: storefront-cli capture {}", resp.order_id);
        }
        Command::Capture { order_id } => {
            let order = api.capture(order_id).await?;
            println!("Order #{} is now {}.", order.id, order.status);
        }
        Command::Orders => {
            for o in api.orders().await? {
                print_order_row(&o);
            }
        }
        Command::Order { id } => print_json(&api.order(id).await?)?,
        Command::Apply {
            business_name,
            phone,
            address,
            description,
        } => {
            let req = PartnerApplicationRequest {
                business_name,
                contact_phone: phone,
                address,
                description,
            };
            let app = api.apply_partner(&req).await?;
            println!("Application #{} submitted ({}).", app.id, app.status);
        }
        Command::Applications => {
            for a in api.my_applications().await? {
                match &a.rejection_reason {
                    Some(reason) => println!("{:>4}  {}  {}: {reason}", a.id, a.business_name, a.status),
                    None => println!("{:>4}  {}  {}", a.id, a.business_name, a.status),
                }
            }
        }
    }
    Ok(())
}

fn money(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_bouquet_row(b: &Bouquet) {
    let flag = if b.is_available { "" } else { "  (unavailable)" };
    println!("{:>4}  {:<32} {:>9}{flag}", b.id, b.name, money(b.price_cents));
}

fn print_order_row(o: &Order) {
    println!(
        "{:>4}  {:<10} {:>9} {}  {}",
        o.id,
        o.status,
        money(o.total_cents),
        o.currency,
        o.created_at.format("%Y-%m-%d %H:%M")
    );
}

fn print_cart(cart: &Cart) {
    if cart.is_empty() {
        println!("The cart is empty.");
        return;
    }
    for item in &cart.items {
        println!(
            "{:>4}  {:<32} x{:<3} {:>9}",
            item.bouquet_id,
            item.name,
            item.quantity,
            money(item.line_total_cents())
        );
    }
    println!(
        "{} items, total {}",
        cart.item_count(),
        money(cart.total_cents())
    );
}

//! OpenSASE Storefront - command-line shop client

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_storefront::account::{AccountService, SessionStore};
use opensase_storefront::api::cep::CepClient;
use opensase_storefront::api::ApiClient;
use opensase_storefront::checkout::{pay_now, pay_order_with_card, CheckoutController, CheckoutRedirect};
use opensase_storefront::config::Config;
use opensase_storefront::domain::aggregates::checkout::{CustomerInfo, ShippingAddress};
use opensase_storefront::domain::value_objects::Money;
use opensase_storefront::poller::{PaymentPoller, PollState};
use opensase_storefront::storage::{FileStorage, KeyValueStorage};
use opensase_storefront::store::CartStore;
use opensase_storefront::{CardDetails, Payment, PaymentMethod, PaymentProvider};

#[derive(Parser, Debug)]
#[command(name = "storefront", version, about = "Browse the OpenSASE shop, check out and track payments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the catalog
    Products,
    /// Show one product
    Product { slug: String },
    /// Inspect or change the local cart
    #[command(subcommand)]
    Cart(CartCommand),
    /// Quote shipping for the cart
    Quote { zip: String },
    /// Place an order for the cart
    Checkout(CheckoutArgs),
    /// Pay an order with a tokenized card (Mercado Pago)
    PayCard(PayCardArgs),
    /// Show a payment, optionally until it settles
    Payment {
        id: i64,
        #[arg(long)]
        watch: bool,
        /// Confirm a dummy-provider payment
        #[arg(long)]
        simulate_paid: bool,
    },
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "STOREFRONT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "STOREFRONT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Me,
    /// List your orders
    Orders,
    /// Show one of your orders
    Order { id: i64 },
    /// Start a payment for one of your orders
    Pay {
        id: i64,
        #[arg(long, default_value = "mercado_pago")]
        provider: PaymentProvider,
        #[arg(long, default_value = "pix")]
        method: PaymentMethod,
    },
    /// Look up an address by CEP
    Cep { cep: String },
}

#[derive(Subcommand, Debug)]
enum CartCommand {
    Show,
    Add {
        slug: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        qty: i64,
    },
    Remove { product_id: i64 },
    Set {
        product_id: i64,
        #[arg(allow_negative_numbers = true)]
        qty: i64,
    },
    Clear,
}

#[derive(Args, Debug)]
struct CheckoutArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long)]
    zip: String,
    #[arg(long, default_value = "")]
    street: String,
    #[arg(long)]
    number: String,
    #[arg(long, default_value = "")]
    complement: String,
    #[arg(long, default_value = "")]
    district: String,
    #[arg(long, default_value = "")]
    city: String,
    #[arg(long, default_value = "")]
    state: String,
    /// Prefill street, district, city and state from the CEP
    #[arg(long)]
    autofill: bool,
    /// Shipping option id; the first quote is used otherwise
    #[arg(long)]
    shipping: Option<String>,
    #[arg(long, default_value = "dummy")]
    provider: PaymentProvider,
    #[arg(long, default_value = "pix")]
    method: PaymentMethod,
    /// Track the payment after the order is placed
    #[arg(long)]
    watch: bool,
}

#[derive(Args, Debug)]
struct PayCardArgs {
    #[arg(long)]
    order: i64,
    #[arg(long)]
    token: String,
    #[arg(long)]
    payment_method_id: String,
    #[arg(long, default_value_t = 1)]
    installments: u32,
    #[arg(long, default_value = "")]
    issuer_id: String,
}

struct App {
    config: Config,
    api: ApiClient,
    session: Arc<SessionStore>,
    cart: Arc<CartStore>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(
            FileStorage::open(&config.data_dir).with_context(|| format!("opening data dir {}", config.data_dir.display()))?,
        );
        let session = Arc::new(SessionStore::new(Arc::clone(&storage)));
        let api = ApiClient::new(&config)?.with_session(Arc::clone(&session));
        let cart = Arc::new(CartStore::new(storage));
        Ok(Self { config, api, session, cart })
    }

    fn accounts(&self) -> AccountService { AccountService::new(self.api.clone(), Arc::clone(&self.session)) }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let app = App::new(Config::from_env()?)?;
    tracing::debug!(api = %app.config.api_url, data_dir = %app.config.data_dir.display(), "storefront configured");

    match cli.command {
        Command::Products => {
            for p in app.api.list_products().await? {
                println!("{:>5}  {:<32} {:>12}  {}", p.id, p.name, p.price().to_string(), p.slug);
            }
        }
        Command::Product { slug } => {
            let p = app.api.get_product(&slug).await?;
            println!("{} ({})", p.name, p.slug);
            println!("Price: {}", p.price());
            if let Some(category) = &p.category { println!("Category: {}", category.name); }
            if let Some(brand) = &p.brand { println!("Brand: {}", brand.name); }
            if let Some(description) = &p.description { println!("\n{description}"); }
        }
        Command::Cart(command) => run_cart(&app, command).await?,
        Command::Quote { zip } => {
            let mut controller = CheckoutController::new(Arc::new(app.api.clone()), Arc::clone(&app.cart));
            controller.set_zip(&zip);
            for q in controller.request_quotes().await? {
                println!("{:<10} {:<20} {:>12}  {} day(s)", q.id, q.label, Money::parse_lenient(&q.price).to_string(), q.days);
            }
        }
        Command::Checkout(args) => run_checkout(&app, args).await?,
        Command::PayCard(args) => {
            let card = CardDetails { token: args.token, payment_method_id: args.payment_method_id, installments: args.installments, issuer_id: args.issuer_id };
            if let CheckoutRedirect::PaymentStatus { payment_id, .. } = pay_order_with_card(&app.api, args.order, card).await? {
                track_payment(&app, payment_id, false, false).await?;
            }
        }
        Command::Payment { id, watch, simulate_paid } => track_payment(&app, id, watch, simulate_paid).await?,
        Command::Login { username, password } => {
            app.accounts().login(&username, &password).await?;
            println!("Signed in as {username}");
        }
        Command::Register { username, email, password } => {
            let user = app.accounts().register(&username, &email, &password).await?;
            println!("Welcome, {}!", user.username);
        }
        Command::Logout => {
            app.accounts().logout()?;
            println!("Signed out");
        }
        Command::Me => {
            let user = app.accounts().me().await?;
            println!("{} <{}>", user.username, user.email);
        }
        Command::Orders => {
            for o in app.api.my_orders().await? {
                let total = Money::parse_lenient(o.total.as_deref().unwrap_or(&o.subtotal));
                println!("#{:<6} {:<18} {:>12}", o.id, o.status.label(), total.to_string());
            }
        }
        Command::Order { id } => {
            let order = app.api.my_order(id).await?;
            println!("Order #{} - {}", order.id, order.status.label());
            for line in &order.items {
                println!("  {} x{}  {}", line.name, line.qty, line.line_total());
            }
            println!("Ship to: {}, {} - {}, {}/{} {}", order.shipping_street, order.shipping_number, order.shipping_district, order.shipping_city, order.shipping_state, order.shipping_zip);
            println!("Total: {}", order.total());
        }
        Command::Pay { id, provider, method } => {
            if let CheckoutRedirect::PaymentStatus { payment_id, .. } = pay_now(&app.api, id, provider, method).await? {
                track_payment(&app, payment_id, false, false).await?;
            }
        }
        Command::Cep { cep } => {
            let address = CepClient::new(&app.config)?.fetch_address(&cep).await?;
            println!("{} - {}, {}/{}", address.logradouro, address.bairro, address.localidade, address.uf);
        }
    }
    Ok(())
}

async fn run_cart(app: &App, command: CartCommand) -> Result<()> {
    match command {
        CartCommand::Show => {}
        CartCommand::Add { slug, qty } => {
            let product = app.api.get_product(&slug).await?;
            app.cart.add_to_cart(&product, qty)?;
        }
        CartCommand::Remove { product_id } => app.cart.remove_from_cart(product_id)?,
        CartCommand::Set { product_id, qty } => app.cart.set_qty(product_id, qty)?,
        CartCommand::Clear => app.cart.clear_cart()?,
    }

    let cart = app.cart.snapshot();
    if cart.is_empty() {
        println!("Your cart is empty");
        return Ok(());
    }
    for item in cart.items() {
        println!("{:>5}  {:<32} x{:<3} {:>12}", item.product_id, item.name, item.qty, item.line_total().to_string());
    }
    println!("{} item(s), subtotal {}", cart.count(), cart.subtotal());
    Ok(())
}

async fn run_checkout(app: &App, args: CheckoutArgs) -> Result<()> {
    let mut controller = CheckoutController::new(Arc::new(app.api.clone()), Arc::clone(&app.cart));
    *controller.customer_mut() = CustomerInfo { full_name: args.name, email: args.email, phone: args.phone };
    controller.set_address(ShippingAddress {
        zip: args.zip,
        street: args.street,
        number: args.number,
        complement: args.complement,
        district: args.district,
        city: args.city,
        state: args.state,
    });
    controller.set_payment(args.provider, args.method);

    if args.autofill {
        let cep = CepClient::new(&app.config)?;
        if let Some(warning) = controller.autofill_address(&cep).await {
            eprintln!("Address autofill: {warning}");
        }
    }

    controller.request_quotes().await?;
    if let Some(id) = &args.shipping {
        controller.select_quote(id)?;
    }
    let totals = controller.totals();
    if let Some(quote) = controller.selected_quote() {
        println!("Shipping: {} ({} day(s)) {}", quote.label, quote.days, totals.shipping);
    }
    println!("Subtotal {}  Total {}", totals.subtotal, totals.total);

    match controller.submit().await? {
        CheckoutRedirect::CardPayment { order_id } => {
            println!("Order #{order_id} placed. Pay it with: storefront pay-card --order {order_id} --token <card token> --payment-method-id <brand>");
        }
        CheckoutRedirect::PaymentStatus { order_id, payment_id } => {
            println!("Order #{order_id} placed");
            track_payment(app, payment_id, args.watch, false).await?;
        }
    }
    Ok(())
}

async fn track_payment(app: &App, payment_id: i64, watch: bool, simulate_paid: bool) -> Result<()> {
    let poller = PaymentPoller::new(Arc::new(app.api.clone()), payment_id).with_interval(app.config.poll_interval).spawn();
    let mut updates = poller.subscribe();

    let mut printed = 0;
    let first = loop {
        updates.changed().await.context("payment poller stopped")?;
        let state = updates.borrow_and_update().clone();
        if state.polls > 0 {
            break state;
        }
    };
    if let Some(payment) = &first.payment {
        print_payment(payment);
        printed = first.polls;
    } else if let Some(error) = &first.error {
        bail!("Could not load payment #{payment_id}: {error}");
    }

    if simulate_paid {
        poller.simulate_paid().await?;
        println!("Dummy confirmation sent");
    }
    if !(watch || simulate_paid) || first.is_settled() {
        return Ok(());
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                changed.context("payment poller stopped")?;
                let state: PollState = updates.borrow_and_update().clone();
                if state.polls == printed {
                    continue;
                }
                printed = state.polls;
                match (&state.payment, &state.error) {
                    (_, Some(error)) => eprintln!("Could not refresh payment: {error}"),
                    (Some(payment), None) => println!("Status: {}", payment.status),
                    (None, None) => {}
                }
                if state.is_settled() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped watching payment #{payment_id}");
                return Ok(());
            }
        }
    }
}

fn print_payment(payment: &Payment) {
    println!("Payment #{} for order #{}: {} via {} ({})", payment.id, payment.order, payment.status, payment.provider, payment.method);
    println!("Amount: {}", Money::parse_lenient(&payment.amount));
    if let Some(code) = payment.pix_code() {
        println!("Pix copy-and-paste code:\n{code}");
        if let Some(expires) = payment.pix_expires_at {
            println!("Expires at {}", expires.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    if payment.status.is_unsuccessful() {
        println!("The payment did not go through. You can try again from your orders.");
    }
}

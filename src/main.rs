use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use tandt::config::Config;
use tandt::market::{
  find_favorite, Availability, DesiredJob, Favorite, ImageAttachment, Location, Marketplace,
  Modality, NewOffer, Offer, ProfileUpdate,
};
use tandt::query::Query;

#[derive(Parser, Debug)]
#[command(name = "tandt")]
#[command(about = "Command-line client for the T&T marketplace")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tandt/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the API base URL
  #[arg(long)]
  base_url: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List active offers
  Offers,
  /// List your own offers
  Mine,
  /// Show one offer
  Offer { id: String },
  /// Publish a new offer
  Create(CreateArgs),
  /// Delete one of your offers
  Delete { id: String },
  /// Pause an active offer
  Pause { id: String },
  /// Reactivate a paused offer
  Resume { id: String },
  /// Pause or reactivate an offer depending on its current status
  Toggle { id: String },
  /// List favorites
  Favorites,
  /// Manage favorites
  Favorite {
    #[command(subcommand)]
    action: FavoriteAction,
  },
  /// Show your profile
  Profile {
    /// Skip the cache and read from the server
    #[arg(long)]
    refresh: bool,
  },
  /// Save additional profile info
  ConfigureProfile(ConfigureArgs),
  /// Upload a new profile photo
  Photo { path: PathBuf },
  /// Spend one credit
  ConsumeCredit {
    /// Client id (defaults to user_id from the config)
    owner: Option<String>,
  },
  /// Clear the local cache
  ClearCache,
}

#[derive(Subcommand, Debug)]
enum FavoriteAction {
  /// Bookmark a user
  Add { user_id: String },
  /// Delete a favorite by its id
  Remove { id: String },
  /// Show one favorite
  Show { id: String },
  /// Check whether a user is bookmarked
  Check { user_id: String },
}

#[derive(clap::Args, Debug)]
struct CreateArgs {
  #[arg(long)]
  service: String,
  #[arg(long)]
  title: String,
  #[arg(long)]
  description: Option<String>,
  #[arg(long)]
  price: Option<f64>,
  /// Image file to attach
  #[arg(long)]
  image: Option<PathBuf>,
  /// Comma-separated weekdays
  #[arg(long, value_delimiter = ',')]
  days: Vec<String>,
  #[arg(long)]
  start: String,
  #[arg(long)]
  end: String,
  #[arg(long)]
  city: String,
  #[arg(long)]
  address: Option<String>,
  /// presencial, virtual or ambas
  #[arg(long, default_value = "presencial")]
  modality: String,
}

impl CreateArgs {
  fn into_new_offer(self) -> Result<NewOffer> {
    let modality = match self.modality.to_lowercase().as_str() {
      "presencial" => Modality::Presencial,
      "virtual" => Modality::Virtual,
      "ambas" => Modality::Ambas,
      other => return Err(eyre!("Unknown modality: {}", other)),
    };

    Ok(NewOffer {
      service_id: self.service,
      title: self.title,
      description: self.description,
      price: self.price,
      image: self.image.map(|path| ImageAttachment {
        path,
        mime_type: None,
      }),
      availability: Availability {
        days: self.days,
        start_time: self.start,
        end_time: self.end,
      },
      location: Location {
        city: self.city,
        address: self.address,
        modality,
      },
    })
  }
}

#[derive(clap::Args, Debug)]
struct ConfigureArgs {
  #[arg(long)]
  education: Option<String>,
  #[arg(long)]
  citizenship: Option<String>,
  /// Kind of job you are looking for (needs --job-city)
  #[arg(long)]
  job: Option<String>,
  #[arg(long)]
  job_city: Option<String>,
  #[arg(long)]
  income: Option<f64>,
  /// Comma-separated user ids
  #[arg(long, value_delimiter = ',')]
  contacts: Vec<String>,
}

impl ConfigureArgs {
  fn into_update(self) -> Result<ProfileUpdate> {
    let desired_job = match (self.job, self.job_city) {
      (Some(kind), Some(city)) => Some(DesiredJob {
        kind,
        city,
        expected_income: self.income,
      }),
      (None, None) => None,
      _ => return Err(eyre!("--job and --job-city must be given together")),
    };

    Ok(ProfileUpdate {
      education_level: self.education,
      citizenship: self.citizenship,
      desired_job,
      favorite_contacts: (!self.contacts.is_empty()).then_some(self.contacts),
      ..ProfileUpdate::default()
    })
  }
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_env("TANDT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

  let (writer, guard) = match log_file {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      tracing_appender::non_blocking(file)
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(writer)
    .init();

  Ok(guard)
}

/// Wait for a query to settle and surface its error
async fn settle<T, P>(query: &Query<T, P>) -> Result<T>
where
  T: Clone + Send + Sync + 'static,
  P: Clone + PartialEq + Send + Sync + 'static,
{
  let state = query.settled().await;
  if let Some(message) = state.error {
    return Err(eyre!(message));
  }
  state.data.ok_or_else(|| eyre!("No data returned"))
}

fn print_offers(offers: &[Offer]) {
  if offers.is_empty() {
    println!("No offers.");
    return;
  }
  for offer in offers {
    let price = offer
      .price
      .map(|p| format!("{:.2}", p))
      .unwrap_or_else(|| "-".to_string());
    println!(
      "{:<24} {:<8} {:>10}  {}",
      offer.id,
      offer.status.to_string(),
      price,
      offer.title
    );
  }
}

fn print_offer(offer: &Offer) {
  println!("{} [{}]", offer.title, offer.status);
  println!("  id: {}", offer.id);
  if let Some(description) = &offer.description {
    println!("  {}", description);
  }
  if let Some(price) = offer.price {
    println!("  price: {:.2}", price);
  }
  if let Some(availability) = &offer.availability {
    println!(
      "  available: {} {}-{}",
      availability.days.join(", "),
      availability.start_time,
      availability.end_time
    );
  }
  if let Some(owner) = offer.owner.as_ref().and_then(|o| o.full_name.as_deref()) {
    println!("  by: {}", owner);
  }
}

fn print_favorites(favorites: &[Favorite]) {
  if favorites.is_empty() {
    println!("No favorites.");
    return;
  }
  for favorite in favorites {
    let name = favorite
      .user
      .as_ref()
      .and_then(|u| u.full_name.as_deref())
      .unwrap_or("-");
    let target = favorite.target_user_id.as_deref().unwrap_or("-");
    println!("{:<24} {:<24} {}", favorite.id, target, name);
  }
}

async fn run(market: &Marketplace, config: &Config, command: Command) -> Result<()> {
  match command {
    Command::Offers => print_offers(&settle(&market.active_offers()).await?),
    Command::Mine => print_offers(&settle(&market.my_offers()).await?),
    Command::Offer { id } => print_offer(&settle(&market.offer_detail(id)).await?),
    Command::Create(args) => {
      let mine = market.my_offers();
      settle(&mine).await?;
      let created = market.create_offer().execute(args.into_new_offer()?).await?;
      println!("Created offer {}", created.id);
      print_offers(&mine.items());
    }
    Command::Delete { id } => {
      market.delete_offer().execute(id.clone()).await?;
      println!("Deleted offer {}", id);
    }
    Command::Pause { id } => {
      let mine = market.my_offers();
      settle(&mine).await?;
      market.pause_offer().execute(id).await?;
      print_offers(&mine.items());
    }
    Command::Resume { id } => {
      let mine = market.my_offers();
      settle(&mine).await?;
      market.reactivate_offer().execute(id).await?;
      print_offers(&mine.items());
    }
    Command::Toggle { id } => {
      let current = settle(&market.offer_detail(id.clone())).await?;
      let action = market
        .toggle_offer_status()
        .execute((id.clone(), current.status))
        .await?;
      println!("{:?}: {}", action, id);
    }
    Command::Favorites => print_favorites(&settle(&market.favorites()).await?),
    Command::Favorite { action } => match action {
      FavoriteAction::Add { user_id } => {
        let list = market.favorites();
        settle(&list).await?;
        let created = market.add_favorite().execute(user_id).await?;
        println!("Added favorite {}", created.id);
        print_favorites(&list.items());
      }
      FavoriteAction::Remove { id } => {
        let list = market.favorites();
        settle(&list).await?;
        market.remove_favorite().execute(id).await?;
        print_favorites(&list.items());
      }
      FavoriteAction::Show { id } => {
        print_favorites(&[settle(&market.favorite_detail(id)).await?])
      }
      FavoriteAction::Check { user_id } => {
        let favorites = settle(&market.favorites()).await?;
        match find_favorite(&favorites, &user_id) {
          Some(found) => println!("{} is a favorite ({})", user_id, found.id),
          None => println!("{} is not a favorite", user_id),
        }
      }
    },
    Command::Profile { refresh } => {
      let profiles = market.profile_store();
      let profile = if refresh {
        profiles.refresh().await?
      } else {
        let result = profiles.profile().await?;
        tracing::info!(source = ?result.source, "profile loaded");
        result.data
      };
      println!("{}", profile.full_name.as_deref().unwrap_or("-"));
      println!("  email: {}", profile.email.as_deref().unwrap_or("-"));
      println!("  city: {}", profile.city.as_deref().unwrap_or("-"));
      println!("  credits: {}", profile.credits.unwrap_or(0));
    }
    Command::ConfigureProfile(args) => {
      let profiles = market.profile_store();
      // The user id is read from the cached profile
      profiles.profile().await?;
      let profile = profiles.configure_profile(args.into_update()?).await?;
      println!("Profile updated for {}", profile.full_name.as_deref().unwrap_or("-"));
    }
    Command::Photo { path } => {
      let upload = market
        .profile_store()
        .update_profile_photo(ImageAttachment {
          path,
          mime_type: None,
        })
        .await?;
      println!("Photo: {}", upload.photo_url.as_deref().unwrap_or("-"));
    }
    Command::ConsumeCredit { owner } => {
      let owner = owner.or_else(|| config.user_id.clone()).unwrap_or_default();
      let consumer = market.credit_consumer();
      consumer.consume_credit(&owner).await?;
      let state = consumer.snapshot();
      println!("{}", state.message.unwrap_or_default());
      println!("credits: {}", market.profile_store().credits()?);
    }
    Command::ClearCache => {
      market.clear_session()?;
      println!("Cache cleared.");
    }
  }

  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_file.as_ref())?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override base URL if specified on command line
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }

  let market = Marketplace::from_config(&config)?;
  run(&market, &config, args.command).await
}

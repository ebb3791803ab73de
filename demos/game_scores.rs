/// Example: the same game score flow through a direct and a cached table
///
/// Runs against an in-process store by default. Set `DYNAMO_ENDPOINT_URL`
/// (and an existing `DYNAMO_TABLE_NAME` keyed on `user_id`/`game_title`) to
/// run it against DynamoDB instead.
use dynamo_gateway::{
    Backend, CachedBackend, CachedTable, DirectTable, Entity, Error, KeySchema, MemoryBackend,
    Precondition, RangeFilter, Table, TableConfig, TransactWrite, Update,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    user_id: String,
    game_title: String,
    #[serde(default)]
    top_score: i64,
}

impl Entity for User {
    type PK = String;
    type SK = String;
    const PARTITION_KEY: &'static str = "user_id";
    const SORT_KEY: Option<&'static str> = Some("game_title");

    fn partition_key(&self) -> String {
        self.user_id.clone()
    }

    fn sort_key(&self) -> Option<String> {
        Some(self.game_title.clone())
    }
}

fn user(id: &str, title: &str, top_score: i64) -> User {
    User {
        user_id: id.to_string(),
        game_title: title.to_string(),
        top_score,
    }
}

/// Resubmit whatever the store declined, backing off between attempts
async fn write_all<B: Backend>(table: &Table<User, B>, users: &[User]) -> Result<usize, Error> {
    let mut pending = users.to_vec();
    let mut written = 0;
    let mut delay = Duration::from_millis(100);

    for _ in 0..5 {
        let output = table.batch_write(&pending).await?;
        written += output.processed;
        if output.is_complete() {
            break;
        }
        println!("{} items declined, retrying", output.unprocessed.len());
        pending = output.unprocessed;
        tokio::time::sleep(delay).await;
        delay *= 2;
    }
    Ok(written)
}

async fn run<D: Backend, C: Backend>(dynamo: Table<User, D>, dax: Table<User, C>) -> Result<(), Error> {
    let id = "user-1".to_string();
    let chess = "chess".to_string();

    println!("[dax] get user is {:?}", dax.get(&id, Some(&chess)).await?);

    dax.put(&user("user-1", "chess", 100)).await?;
    println!("[dax] get user is {:?}", dax.get(&id, Some(&chess)).await?);

    let updated = dax
        .update(
            &user("user-1", "chess", 0),
            Update::new().set_value("top_score", &150)?,
        )
        .await?;
    println!("[dax] update user is {updated:?}");

    // Written behind the cache: the cached table keeps serving the old item.
    dynamo.put(&user("user-1", "chess", 200)).await?;
    println!("[dynamo] get user is {:?}", dynamo.get(&id, Some(&chess)).await?);
    println!("[dax] get user is {:?}", dax.get(&id, Some(&chess)).await?);

    let users: Vec<User> = (0..30)
        .map(|i| user("user-2", &format!("game-{i:02}"), i * 10))
        .collect();
    println!("[dax] batch write users count is {}", write_all(&dax, &users).await?);

    let keys: Vec<_> = users[..3].iter().map(Entity::composite_key).collect();
    let found = dax.batch_get(&keys).await?;
    println!("[dax] batch get users is {:?}", found.items);

    let user_2 = "user-2".to_string();
    println!("[dynamo] query users count is {}", dynamo.query(&user_2).await?.len());
    println!("[dax] query users count is {}", dax.query(&user_2).await?.len());

    let range = RangeFilter::between_values("top_score", &100, &200)?;
    println!("[dynamo] scan users count is {}", dynamo.scan(&range).await?.len());
    println!("[dax] user count is {}", dax.count(&range).await?);

    dax.delete(&id, Some(&chess)).await?;
    println!("[dax] get user is {:?}", dax.get(&id, Some(&chess)).await?);

    println!(
        "[dax] put if exists is {:?}",
        dax.put_if_exists(&user("user-1", "chess", 10)).await?
    );
    println!(
        "[dax] put if absent is {:?}",
        dax.put_if_absent(&user("user-1", "chess", 10)).await?
    );

    let raise = Update::new().set_value("top_score", &20)?;
    let cas = |guard: Precondition| {
        vec![
            TransactWrite::update((id.clone(), Some(chess.clone())), raise.clone())
                .with_precondition(guard),
            TransactWrite::put(user("user-1", "go", 5)),
        ]
    };
    let stale = Precondition::equals_value("top_score", &999)?;
    let output = dax.transact_write(&cas(stale)).await?;
    println!("[dax] transact write is {:?}, committed {}", output.outcome, output.committed);
    let current = Precondition::equals_value("top_score", &10)?;
    let output = dax.transact_write(&cas(current)).await?;
    println!("[dax] transact write is {:?}, committed {}", output.outcome, output.committed);

    let keys = vec![(id.clone(), Some(chess.clone())), (id.clone(), Some("go".to_string()))];
    let read = dax.transact_get(&keys).await?;
    println!("[dax] transact get users is {:?}", read.items);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    if std::env::var("DYNAMO_ENDPOINT_URL").is_ok() {
        let config = TableConfig::from_env()?;
        let dynamo = DirectTable::<User>::connect(config.clone()).await?;
        let dax = CachedTable::<User>::connect_cached(config).await?;
        return run(dynamo, dax).await;
    }

    let config = TableConfig::new("GameScores");
    let memory = MemoryBackend::new().with_table(&config.table_name, KeySchema::of::<User>());
    let cached = CachedBackend::from_config(memory.clone(), &config.cache)
        .with_table(&config.table_name, KeySchema::of::<User>());

    run(
        Table::new(memory, config.clone())?,
        Table::new(cached, config)?,
    )
    .await
}

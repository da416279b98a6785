use strata_kv::Db;
use tempfile::tempdir;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let dir = tempdir()?;
    let mut db = Db::open("lsmtree", dir.path())?;

    db.put("hello", "world")?;
    println!("GET hello = {:?}", db.get("hello")?);

    db.delete("hello")?;
    println!("GET hello after delete = {:?}", db.get("hello")?);

    db.put("apple", "red fruit")?;
    db.put("apply", "to request something")?;
    db.put("banana", "yellow fruit")?;
    println!("FUZZY apple/1 = {:?}", db.fuzzy_get("apple", 1)?);

    db.close()?;
    Ok(())
}
